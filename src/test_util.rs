//! Helpers for tests that negotiate against a real webrtc-rs peer playing the browser's role.

use crate::error::{Error, Result};
use crate::session::build_api;
use crate::signal::{IceCandidate, SessionDescription, SignalingMessage};
use crate::signaling::SignalSink;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub(crate) const TIMEOUT: Duration = Duration::from_secs(20);

struct ChannelSink(UnboundedSender<SignalingMessage>);

impl SignalSink for ChannelSink {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        self.0
            .send(message)
            .map_err(|_| Error::SignalingUnavailable("recorder dropped".into()))
    }
}

/// Sink recording every outbound signaling message in emission order.
pub(crate) fn recording_sink() -> (Arc<dyn SignalSink>, UnboundedReceiver<SignalingMessage>) {
    let (tx, rx) = unbounded_channel();
    (Arc::new(ChannelSink(tx)), rx)
}

/// Waits for the next outbound message and asserts it is an answer.
pub(crate) async fn wait_for_answer(
    signals: &mut UnboundedReceiver<SignalingMessage>,
) -> SignalingMessage {
    let msg = tokio::time::timeout(TIMEOUT, signals.recv())
        .await
        .expect("answer in time")
        .expect("sink open");
    assert!(
        matches!(msg, SignalingMessage::Answer { .. }),
        "expected an answer first, got {:?}",
        msg
    );
    msg
}

pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition reached in time")
}

pub(crate) fn ice_ufrag(sdp: &str) -> Option<&str> {
    sdp.lines()
        .find_map(|line| line.trim().strip_prefix("a=ice-ufrag:"))
}

/// Offering side of a negotiation: creates the data channel and sends the offer, like a browser
/// viewer would.
pub(crate) struct RemotePeer {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    opened: Mutex<UnboundedReceiver<()>>,
    messages: Mutex<UnboundedReceiver<DataChannelMessage>>,
    candidates: Mutex<UnboundedReceiver<IceCandidate>>,
}

impl RemotePeer {
    pub(crate) async fn start(label: &str) -> Result<Self> {
        let api = build_api()?;
        let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);

        let (candidates_tx, candidates) = unbounded_channel();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(init) = candidate.and_then(|c| c.to_json().ok()) {
                let _ = candidates_tx.send(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid.unwrap_or_default(),
                    sdp_mline_index: init.sdp_mline_index,
                });
            }
            Box::pin(async move {})
        }));

        let dc = pc.create_data_channel(label, None).await?;
        let (opened_tx, opened) = unbounded_channel();
        dc.on_open(Box::new(move || {
            let _ = opened_tx.send(());
            Box::pin(async move {})
        }));
        let (messages_tx, messages) = unbounded_channel();
        dc.on_message(Box::new(move |msg| {
            let _ = messages_tx.send(msg);
            Box::pin(async move {})
        }));

        Ok(RemotePeer {
            pc,
            dc,
            opened: Mutex::new(opened),
            messages: Mutex::new(messages),
            candidates: Mutex::new(candidates),
        })
    }

    pub(crate) async fn offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription {
            sdp_type: offer.sdp_type.to_string(),
            sdp: offer.sdp,
        })
    }

    /// Applies a message the client addressed to this peer.
    pub(crate) async fn apply(&self, msg: SignalingMessage) -> Result<()> {
        match msg {
            SignalingMessage::Answer { answer, .. } => {
                let answer = RTCSessionDescription::answer(answer.sdp)?;
                self.pc.set_remote_description(answer).await?;
            }
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.pc
                    .add_ice_candidate(RTCIceCandidateInit {
                        candidate: candidate.candidate,
                        sdp_mid: Some(candidate.sdp_mid),
                        sdp_mline_index: candidate.sdp_mline_index,
                        username_fragment: None,
                    })
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Next locally gathered candidate, `None` if gathering went quiet.
    pub(crate) async fn next_candidate(&self) -> Option<IceCandidate> {
        let mut candidates = self.candidates.lock().await;
        tokio::time::timeout(TIMEOUT, candidates.recv())
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn opened(&self) {
        let mut opened = self.opened.lock().await;
        tokio::time::timeout(TIMEOUT, opened.recv())
            .await
            .expect("data channel opened in time");
    }

    pub(crate) async fn next_message(&self) -> Option<DataChannelMessage> {
        let mut messages = self.messages.lock().await;
        messages.recv().await
    }

    pub(crate) async fn send_text(&self, text: &str) -> Result<()> {
        self.dc.send_text(text.to_owned()).await?;
        Ok(())
    }

    pub(crate) async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.dc.send(&Bytes::copy_from_slice(data)).await?;
        Ok(())
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
