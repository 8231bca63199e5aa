use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Signaling server could not be reached. This is the only error that aborts startup.
    #[error("signaling server unavailable: {0}")]
    SignalingUnavailable(String),
    /// Inbound signaling message was malformed or could not be routed.
    #[error("signaling protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    /// Encoded frame does not fit into a single data channel message, even at the lowest quality.
    #[error("encoded frame of {size} bytes exceeds the {limit} byte message limit")]
    FrameTooLarge { size: usize, limit: usize },
    /// Data channel is closed or was never opened.
    #[error("data channel is not open")]
    ChannelUnavailable,
    #[error(transparent)]
    Rtc(Arc<webrtc::Error>),
    #[error(transparent)]
    Json(Arc<serde_json::Error>),
}

impl From<webrtc::Error> for Error {
    fn from(value: webrtc::Error) -> Self {
        match value {
            webrtc::Error::ErrDataChannelNotOpen | webrtc::Error::ErrClosedPipe => {
                Error::ChannelUnavailable
            }
            other => Error::Rtc(Arc::new(other)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(Arc::new(value))
    }
}

impl From<image::ImageError> for Error {
    fn from(value: image::ImageError) -> Self {
        Error::Encode(value.to_string())
    }
}
