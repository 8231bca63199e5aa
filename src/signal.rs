//! Wire format of the messages exchanged with the signaling server.
//!
//! Every message is a JSON object tagged by its `type` field:
//!
//! ```json
//! {"type":"offer","from":"peerA","offer":{"type":"offer","sdp":"v=0..."}}
//! {"type":"ice-candidate","target":"peerA","candidate":{"candidate":"candidate:1 ...","sdpMid":"0"}}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Sent once after connecting, registering this client in the server's routing table. The
    /// server echoes it back with a `status`.
    Connection {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Offer {
        from: String,
        offer: SessionDescription,
    },
    Answer {
        target: String,
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        candidate: IceCandidate,
    },
    /// Routing failure reported by the signaling server.
    Error { message: String },
    /// Any other message type. Reserved for signaling server bookkeeping.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl SignalingMessage {
    pub fn connection(client_id: impl Into<String>) -> Self {
        SignalingMessage::Connection {
            client_id: client_id.into(),
            status: None,
        }
    }

    pub fn answer(target: impl Into<String>, answer: SessionDescription) -> Self {
        SignalingMessage::Answer {
            target: target.into(),
            answer,
        }
    }

    pub fn candidate_for(target: impl Into<String>, candidate: IceCandidate) -> Self {
        SignalingMessage::IceCandidate {
            from: None,
            target: Some(target.into()),
            candidate,
        }
    }

    /// Parses a text frame received from the signaling server. Anything that is not valid JSON or
    /// lacks a field required by its `type` is reported as [Error::ProtocolViolation].
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ProtocolViolation(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Name of the message type as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Connection { .. } => "connection",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
            SignalingMessage::Error { .. } => "error",
            SignalingMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod test {
    use crate::signal::{IceCandidate, SessionDescription, SignalingMessage};
    use serde_json::{json, Value};

    #[test]
    fn parse_offer() {
        let text = r#"{"type":"offer","from":"peerA","offer":{"sdp":"S1","type":"offer"}}"#;
        let msg = SignalingMessage::parse(text).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Offer {
                from: "peerA".into(),
                offer: SessionDescription {
                    sdp_type: "offer".into(),
                    sdp: "S1".into(),
                },
            }
        );
    }

    #[test]
    fn parse_inbound_candidate() {
        let text = r#"{"type":"ice-candidate","from":"peerA",
            "candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match SignalingMessage::parse(text).unwrap() {
            SignalingMessage::IceCandidate {
                from,
                target,
                candidate,
            } => {
                assert_eq!(from.as_deref(), Some("peerA"));
                assert_eq!(target, None);
                assert_eq!(candidate.sdp_mid, "0");
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn parse_server_bookkeeping() {
        let ack = r#"{"type":"connection","status":"connected","clientId":"media"}"#;
        assert_eq!(
            SignalingMessage::parse(ack).unwrap(),
            SignalingMessage::Connection {
                client_id: "media".into(),
                status: Some("connected".into()),
            }
        );

        let err = r#"{"type":"error","message":"Target client x not found"}"#;
        assert_eq!(SignalingMessage::parse(err).unwrap().kind(), "error");

        let other = r#"{"type":"presence","peers":[]}"#;
        assert_eq!(
            SignalingMessage::parse(other).unwrap(),
            SignalingMessage::Unknown
        );
    }

    #[test]
    fn reject_malformed() {
        assert!(SignalingMessage::parse("not json").is_err());
        // offer without a sender cannot be routed
        assert!(SignalingMessage::parse(r#"{"type":"offer","offer":{"sdp":"S","type":"offer"}}"#).is_err());
        // candidate payload lacking the candidate line
        assert!(SignalingMessage::parse(
            r#"{"type":"ice-candidate","from":"p","candidate":{"sdpMid":"0"}}"#
        )
        .is_err());
        assert!(SignalingMessage::parse(r#"{"from":"p"}"#).is_err());
    }

    #[test]
    fn outbound_wire_shape() {
        let answer = SignalingMessage::answer(
            "peerA",
            SessionDescription {
                sdp_type: "answer".into(),
                sdp: "S2".into(),
            },
        );
        let value: Value = serde_json::from_str(&answer.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"answer","target":"peerA","answer":{"type":"answer","sdp":"S2"}})
        );

        let candidate = SignalingMessage::candidate_for(
            "peerA",
            IceCandidate {
                candidate: "candidate:2".into(),
                sdp_mid: "0".into(),
                sdp_mline_index: None,
            },
        );
        let value: Value = serde_json::from_str(&candidate.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"ice-candidate","target":"peerA","candidate":{"candidate":"candidate:2","sdpMid":"0"}})
        );

        let hello: Value =
            serde_json::from_str(&SignalingMessage::connection("media").to_json().unwrap())
                .unwrap();
        assert_eq!(hello, json!({"type":"connection","clientId":"media"}));
    }
}
