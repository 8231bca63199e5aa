use crate::codec::DEFAULT_QUALITY;
use crate::data_channel::MAX_MESSAGE_SIZE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Client configuration.
///
/// Deserializable so it can be embedded into an application's own config file. Every field
/// except `client_id` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Identity this client registers with on the signaling server.
    pub client_id: String,
    /// STUN/TURN urls handed to every peer connection.
    pub ice_servers: Vec<String>,
    /// JPEG quality used for outgoing frames, 1..=100.
    pub jpeg_quality: u8,
    /// Upper bound for one encoded frame. Frames above it are re-encoded at lower quality.
    /// Cannot exceed the transport limit of [MAX_MESSAGE_SIZE] bytes.
    pub max_message_size: usize,
}

impl Options {
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Options {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::InvalidOptions(format!(
                "jpeg_quality {} outside 1..=100",
                self.jpeg_quality
            )));
        }
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidOptions(format!(
                "max_message_size {} outside 1..={}",
                self.max_message_size, MAX_MESSAGE_SIZE
            )));
        }
        Ok(())
    }

    pub fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            client_id: String::new(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            jpeg_quality: DEFAULT_QUALITY,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::config::Options;
    use crate::error::Error;

    #[test]
    fn defaults_fill_missing_fields() {
        let options: Options = serde_json::from_str(r#"{"client_id":"media"}"#).unwrap();
        assert_eq!(options.client_id, "media");
        assert_eq!(options.jpeg_quality, 90);
        assert_eq!(options.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(options.max_message_size, 65536);
        assert!(options.validate().is_ok());

        let config = options.rtc_config();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, options.ice_servers);
    }

    #[test]
    fn no_ice_servers() {
        let options = Options {
            ice_servers: vec![],
            ..Options::with_client_id("media")
        };
        assert!(options.rtc_config().ice_servers.is_empty());
    }

    #[test]
    fn rejects_out_of_range_values() {
        for jpeg_quality in [0, 101] {
            let options = Options {
                jpeg_quality,
                ..Options::with_client_id("media")
            };
            assert!(matches!(options.validate(), Err(Error::InvalidOptions(_))));
        }
        for max_message_size in [0, 65537] {
            let options = Options {
                max_message_size,
                ..Options::with_client_id("media")
            };
            assert!(matches!(options.validate(), Err(Error::InvalidOptions(_))));
        }
    }
}
