use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

const TARGET: &str = "wrtc_cast::data_channel";

/// Liveness probe prefix. A text message starting with it is echoed back with [PONG] in its place.
const PING: &str = "ping";
const PONG: &str = "pong";

/// Largest message the SCTP transport accepts. Anything bigger is rejected by the engine.
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Data channel opened by the remote peer, used to push encoded frames.
///
/// Channel answers liveness probes on its own: every inbound text message starting with `"ping"`
/// gets a single `"pong"` reply carrying the same remainder.
pub struct DataChannel {
    dc: Arc<RTCDataChannel>,
    status: Arc<ArcSwap<ChannelState>>,
}

impl DataChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        let status = Arc::new(ArcSwap::from_pointee(ChannelState::Waiting));
        let label: Arc<str> = Arc::from(dc.label());

        let s = Arc::downgrade(&status);
        let l = label.clone();
        dc.on_open(Box::new(move || {
            let s = s.clone();
            let l = l.clone();
            Box::pin(async move {
                if let Some(status) = s.upgrade() {
                    status.rcu(|old| match &**old {
                        ChannelState::Waiting => Arc::new(ChannelState::Open),
                        _ => old.clone(),
                    });
                    info!(target: TARGET, "channel_open label={}", l);
                }
            })
        }));
        let s = Arc::downgrade(&status);
        let l = label.clone();
        dc.on_close(Box::new(move || {
            let s = s.clone();
            let l = l.clone();
            Box::pin(async move {
                if let Some(status) = s.upgrade() {
                    status.store(ChannelState::closed_gracefully());
                    info!(target: TARGET, "channel_closed label={}", l);
                }
            })
        }));
        let s = Arc::downgrade(&status);
        let l = label.clone();
        dc.on_error(Box::new(move |e| {
            let s = s.clone();
            let l = l.clone();
            Box::pin(async move {
                warn!(target: TARGET, "channel_error label={} error={}", l, e);
                if let Some(status) = s.upgrade() {
                    status.store(ChannelState::failed(e.into()));
                }
            })
        }));
        let weak_dc = Arc::downgrade(&dc);
        dc.on_message(Box::new(move |msg| {
            let weak_dc = weak_dc.clone();
            Box::pin(async move {
                echo_ping(&weak_dc, msg).await;
            })
        }));

        // the engine may hand the channel over after it has already opened
        if dc.ready_state() == RTCDataChannelState::Open {
            status.rcu(|old| match &**old {
                ChannelState::Waiting => Arc::new(ChannelState::Open),
                _ => old.clone(),
            });
        }

        DataChannel { dc, status }
    }

    pub fn label(&self) -> &str {
        self.dc.label()
    }

    pub fn is_open(&self) -> bool {
        self.status.load().is_open() && self.dc.ready_state() == RTCDataChannelState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status.load().is_closed()
    }

    /// Sends `data` as a single binary message. Fails with [Error::ChannelUnavailable] if the
    /// channel is not open, including when it closed concurrently with this call.
    pub async fn send(&self, data: &Bytes) -> Result<usize> {
        match &**self.status.load() {
            ChannelState::Open => Ok(self.dc.send(data).await?),
            ChannelState::Waiting => Err(Error::ChannelUnavailable),
            ChannelState::Closed { reason } => {
                if let Some(reason) = reason {
                    debug!(
                        target: TARGET,
                        "send_on_failed label={} reason={}",
                        self.label(),
                        reason
                    );
                }
                Err(Error::ChannelUnavailable)
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.status.store(ChannelState::closed_gracefully());
    }
}

/// Reply expected for an inbound text message, if any.
fn ping_reply(text: &str) -> Option<String> {
    text.strip_prefix(PING).map(|rest| format!("{}{}", PONG, rest))
}

async fn echo_ping(dc: &Weak<RTCDataChannel>, msg: DataChannelMessage) {
    if !msg.is_string {
        return;
    }
    let text = match std::str::from_utf8(&msg.data) {
        Ok(text) => text,
        Err(_) => return,
    };
    if let Some(reply) = ping_reply(text) {
        if let Some(dc) = dc.upgrade() {
            match dc.send_text(reply).await {
                Ok(_) => debug!(target: TARGET, "pong_sent label={}", dc.label()),
                Err(e) => warn!(target: TARGET, "pong_failed label={} error={}", dc.label(), e),
            }
        }
    }
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("label", &self.dc.label())
            .field("state", &**self.status.load())
            .finish()
    }
}

#[derive(Debug)]
enum ChannelState {
    /// Underlying data channel is waiting to become open.
    Waiting,
    /// Underlying data channel is open and ready to send/receive messages.
    Open,
    /// Underlying data channel has already been closed.
    Closed {
        /// Optional error reason, why the channel has been closed.
        reason: Option<Error>,
    },
}

impl ChannelState {
    fn closed_gracefully() -> Arc<Self> {
        Arc::new(ChannelState::Closed { reason: None })
    }

    fn failed(reason: Error) -> Arc<Self> {
        Arc::new(ChannelState::Closed {
            reason: Some(reason),
        })
    }

    fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed { .. })
    }
}
