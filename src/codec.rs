use crate::error::{Error, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, RgbImage};
use log::debug;

const TARGET: &str = "wrtc_cast::codec";

/// JPEG quality used when none is configured.
pub const DEFAULT_QUALITY: u8 = 90;
/// Floor reached when shrinking oversized frames.
pub const MIN_QUALITY: u8 = 1;

/// Memory layout of the pixels in a [Frame].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    /// Blue-green-red byte order, as produced by most camera capture APIs.
    Bgr8,
    /// Alpha is dropped while encoding.
    Rgba8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Raw, tightly packed image frame coming from a video source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Frame {
            width,
            height,
            format,
            data: data.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Encode(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let expected =
            self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(Error::Encode(format!(
                "{:?} frame {}x{} needs {} bytes, got {}",
                self.format,
                self.width,
                self.height,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Turns raw frames into the byte payload sent over the data channel.
pub trait FrameEncoder: Send + Sync {
    /// Encodes `frame` at `quality` (1..=100). Lower quality must not produce larger payloads
    /// for the same frame.
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes>;
}

/// Stateless JPEG encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl FrameEncoder for JpegCodec {
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes> {
        encode(frame, quality)
    }
}

/// Encodes `frame` at `quality`, halving the quality until the payload fits into `limit` bytes.
///
/// Fails with [Error::FrameTooLarge] if the payload is still too large at [MIN_QUALITY].
pub fn encode_within(
    encoder: &dyn FrameEncoder,
    frame: &Frame,
    quality: u8,
    limit: usize,
) -> Result<Bytes> {
    let mut quality = quality;
    loop {
        let payload = encoder.encode(frame, quality)?;
        if payload.len() <= limit {
            return Ok(payload);
        }
        if quality <= MIN_QUALITY {
            return Err(Error::FrameTooLarge {
                size: payload.len(),
                limit,
            });
        }
        debug!(
            target: TARGET,
            "frame_oversized len={} limit={} quality={}",
            payload.len(),
            limit,
            quality
        );
        quality = (quality / 2).max(MIN_QUALITY);
    }
}

/// Encodes `frame` as a baseline JPEG. Identical input and quality always produce identical
/// output.
pub fn encode(frame: &Frame, quality: u8) -> Result<Bytes> {
    if !(1..=100).contains(&quality) {
        return Err(Error::Encode(format!("quality {} outside 1..=100", quality)));
    }
    frame.validate()?;

    let mut out = Vec::with_capacity(frame.data.len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    match frame.format {
        PixelFormat::Gray8 => {
            let image = GrayImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                .ok_or_else(|| Error::Encode("gray buffer size mismatch".into()))?;
            encoder.encode_image(&image)?;
        }
        PixelFormat::Rgb8 => {
            let image = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                .ok_or_else(|| Error::Encode("rgb buffer size mismatch".into()))?;
            encoder.encode_image(&image)?;
        }
        PixelFormat::Bgr8 | PixelFormat::Rgba8 => {
            let image = RgbImage::from_raw(frame.width, frame.height, to_rgb(frame))
                .ok_or_else(|| Error::Encode("rgb buffer size mismatch".into()))?;
            encoder.encode_image(&image)?;
        }
    }
    Ok(Bytes::from(out))
}

fn to_rgb(frame: &Frame) -> Vec<u8> {
    let bpp = frame.format.bytes_per_pixel();
    let mut rgb = Vec::with_capacity(frame.data.len() / bpp * 3);
    for px in frame.data.chunks_exact(bpp) {
        match frame.format {
            PixelFormat::Bgr8 => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
            _ => rgb.extend_from_slice(&px[..3]),
        }
    }
    rgb
}
