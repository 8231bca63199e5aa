//! `wrtc-cast` streams video frames from a single process to a single remote WebRTC peer (usually
//! a browser) over a data channel:
//! - It registers with a WebSocket signaling server under a client identity.
//! - Every offer arriving through signaling replaces the current peer connection with a new one
//!   answering that offer. There is never more than one live peer connection.
//! - Local answers and ICE candidates are sent back through signaling, addressed to the peer that
//!   made the offer.
//! - Frames handed to [Client::send_frame] are JPEG-encoded and sent as binary messages on the
//!   data channel the remote peer opened. Text messages starting with `ping` are echoed back
//!   as `pong`, which lets the viewer measure liveness.
//! - A data channel message holds at most [data_channel::MAX_MESSAGE_SIZE] bytes. Frames whose
//!   JPEG is larger are re-encoded at lower quality until they fit.
//!
//! Signaling messages are JSON objects tagged by `type`, see [signal::SignalingMessage].
//!
//! Failures after startup never propagate to the frame producer: malformed signaling messages,
//! frames that cannot be encoded and sends on a closed channel are logged through the [log]
//! facade and dropped. Only failing to reach the signaling server is reported to the caller.
//!
//! # Examples
//!
//! ```no_run
//! use wrtc_cast::{Client, Error, Frame, Options, PixelFormat};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let options = Options::with_client_id("media-server");
//!     let client = Client::connect("ws://127.0.0.1:7860/ws", options).await?;
//!
//!     let mut ticker = tokio::time::interval(Duration::from_millis(33));
//!     loop {
//!         ticker.tick().await;
//!         let frame = Frame::new(640, 480, PixelFormat::Bgr8, vec![0u8; 640 * 480 * 3]);
//!         // nothing is sent until a viewer connected and opened its data channel
//!         client.send_frame(&frame).await;
//!     }
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod data_channel;
pub mod error;
pub mod session;
pub mod signal;
pub mod signaling;
#[cfg(test)]
mod test_util;

pub use client::Client;
pub use codec::{Frame, FrameEncoder, JpegCodec, PixelFormat};
pub use config::Options;
pub use data_channel::DataChannel;
pub use error::{Error, Result};
pub use session::{PeerSession, SessionState};
pub use signal::SignalingMessage;
pub use signaling::{SignalSink, SignalingLink, SignalingSender};
