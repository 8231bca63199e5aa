use crate::data_channel::DataChannel;
use crate::error::{Error, Result};
use crate::signal::{IceCandidate, SessionDescription, SignalingMessage};
use crate::signaling::SignalSink;
use arc_swap::{ArcSwap, ArcSwapOption};
use log::{debug, info, warn};
use std::fmt::Formatter;
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const TARGET: &str = "wrtc_cast::session";

/// Builds the webrtc-rs entry point shared by every session of a client.
pub fn build_api() -> Result<API> {
    // Create a MediaEngine object to configure the supported codec
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Remote offer applied, answer and candidates being exchanged.
    Negotiating,
    Connected,
    /// Terminal. Closed sessions ignore remote candidates and emit no signaling messages.
    Closed,
}

/// Single peer connection answering one remote offer, together with the data channel the remote
/// peer opens on it.
///
/// Every message the session emits through its [SignalSink] is addressed to the remote identity
/// it was created for. Connection and ICE failures reported by the engine are only logged: a
/// session is never torn down or restarted on its own.
pub struct PeerSession {
    remote_id: Arc<str>,
    pc: Arc<RTCPeerConnection>,
    status: SessionStatus,
    data_channel: Arc<ArcSwapOption<DataChannel>>,
    outbound: Arc<Outbound>,
}

impl PeerSession {
    /// Creates a peer connection for `remote_id`, applies `offer` as its remote description and
    /// emits the resulting answer. Local candidates follow asynchronously.
    pub async fn accept(
        api: &API,
        config: RTCConfiguration,
        remote_id: &str,
        offer: &SessionDescription,
        sink: Arc<dyn SignalSink>,
    ) -> Result<Arc<Self>> {
        let offer = remote_offer(offer)?;
        let remote_id: Arc<str> = Arc::from(remote_id);
        let pc = Arc::new(api.new_peer_connection(config).await?);
        let status = SessionStatus::default();
        let data_channel = Arc::new(ArcSwapOption::empty());
        let outbound = Arc::new(Outbound::new(remote_id.clone(), sink));

        {
            let status = status.clone();
            let remote_id = remote_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |s| {
                debug!(target: TARGET, "connection_state remote={} state={}", remote_id, s);
                match s {
                    RTCPeerConnectionState::Connected => {
                        if status.set_connected() {
                            info!(target: TARGET, "connected remote={}", remote_id);
                        }
                    }
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                        warn!(target: TARGET, "connection_lost remote={} state={}", remote_id, s);
                    }
                    RTCPeerConnectionState::Closed => {
                        status.set_closed();
                    }
                    _ => {}
                }
                Box::pin(async move {})
            }));
        }
        {
            let remote_id = remote_id.clone();
            pc.on_ice_connection_state_change(Box::new(move |s| {
                match s {
                    RTCIceConnectionState::Failed => warn!(
                        target: TARGET,
                        "ice_failed remote={} hint=check STUN/TURN servers and firewall",
                        remote_id
                    ),
                    RTCIceConnectionState::Disconnected => {
                        warn!(target: TARGET, "ice_disconnected remote={}", remote_id)
                    }
                    RTCIceConnectionState::Closed => {
                        info!(target: TARGET, "ice_closed remote={}", remote_id)
                    }
                    RTCIceConnectionState::Completed => {
                        info!(target: TARGET, "ice_completed remote={}", remote_id)
                    }
                    _ => debug!(target: TARGET, "ice_state remote={} state={}", remote_id, s),
                }
                Box::pin(async move {})
            }));
        }
        {
            let remote_id = remote_id.clone();
            pc.on_ice_gathering_state_change(Box::new(move |s| {
                if s == RTCIceGathererState::Complete {
                    info!(target: TARGET, "gathering_complete remote={}", remote_id);
                } else {
                    debug!(target: TARGET, "gathering_state remote={} state={}", remote_id, s);
                }
                Box::pin(async move {})
            }));
        }
        {
            let outbound = outbound.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let outbound = outbound.clone();
                Box::pin(async move {
                    if let Some(candidate) = candidate {
                        match local_candidate(&candidate) {
                            Ok(candidate) => outbound.candidate(candidate).await,
                            Err(e) => warn!(target: TARGET, "candidate_unusable error={}", e),
                        }
                    }
                })
            }));
        }
        {
            let status = status.clone();
            let slot = data_channel.clone();
            let remote_id = remote_id.clone();
            pc.on_data_channel(Box::new(move |dc| {
                if status.get().is_closed() {
                    debug!(target: TARGET, "data_channel_ignored remote={}", remote_id);
                } else {
                    info!(
                        target: TARGET,
                        "data_channel remote={} label={}",
                        remote_id,
                        dc.label()
                    );
                    slot.store(Some(Arc::new(DataChannel::new(dc))));
                }
                Box::pin(async move {})
            }));
        }

        let session = Arc::new(PeerSession {
            remote_id,
            pc,
            status,
            data_channel,
            outbound,
        });
        info!(target: TARGET, "created remote={}", session.remote_id);

        if let Err(e) = session.negotiate(offer).await {
            let _ = session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn negotiate(&self, offer: RTCSessionDescription) -> Result<()> {
        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        self.outbound
            .description(SessionDescription {
                sdp_type: answer.sdp_type.to_string(),
                sdp: answer.sdp,
            })
            .await;
        Ok(())
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> SessionState {
        **self.status.get()
    }

    pub fn is_closed(&self) -> bool {
        self.status.get().is_closed()
    }

    /// Data channel opened by the remote peer, if any arrived yet.
    pub fn data_channel(&self) -> Option<Arc<DataChannel>> {
        self.data_channel.load_full()
    }

    /// Hands a candidate received from the remote peer to the engine. Returns `Ok(false)` when
    /// the session is already closed and the candidate was discarded.
    pub async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<bool> {
        if self.is_closed() {
            debug!(target: TARGET, "candidate_discarded remote={}", self.remote_id);
            return Ok(false);
        }
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        debug!(target: TARGET, "candidate_added remote={}", self.remote_id);
        Ok(true)
    }

    /// Closes the peer connection. Calling it again does nothing.
    pub async fn close(&self) -> Result<()> {
        self.outbound.shut().await;
        if !self.status.set_closed() {
            return Ok(());
        }
        if let Some(dc) = self.data_channel.load_full() {
            dc.mark_closed();
        }
        info!(target: TARGET, "closed remote={}", self.remote_id);
        close_connection(self.pc.clone()).await
    }
}

impl AsRef<RTCPeerConnection> for PeerSession {
    fn as_ref(&self) -> &RTCPeerConnection {
        &self.pc
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote_id", &self.remote_id)
            .field("state", &**self.status.get())
            .finish()
    }
}

fn remote_offer(offer: &SessionDescription) -> Result<RTCSessionDescription> {
    if offer.sdp_type != "offer" {
        return Err(Error::ProtocolViolation(format!(
            "expected an offer, got '{}'",
            offer.sdp_type
        )));
    }
    Ok(RTCSessionDescription::offer(offer.sdp.clone())?)
}

/// `RTCPeerConnection::close` is not `Send`, so it runs to completion on a blocking thread. This
/// keeps [PeerSession::close] usable from spawned tasks.
async fn close_connection(pc: Arc<RTCPeerConnection>) -> Result<()> {
    let runtime = tokio::runtime::Handle::current();
    match tokio::task::spawn_blocking(move || runtime.block_on(pc.close())).await {
        Ok(res) => Ok(res?),
        Err(e) => {
            warn!(target: TARGET, "close_aborted error={}", e);
            Ok(())
        }
    }
}

fn local_candidate(candidate: &RTCIceCandidate) -> Result<IceCandidate> {
    let init = candidate.to_json()?;
    Ok(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid.unwrap_or_default(),
        sdp_mline_index: init.sdp_mline_index,
    })
}

/// Signaling messages a session emits. Candidates gathered before the answer went out are held
/// back, so the remote peer always learns the description first.
struct Outbound {
    remote_id: Arc<str>,
    sink: Arc<dyn SignalSink>,
    state: Mutex<OutboundState>,
}

struct OutboundState {
    closed: bool,
    /// `None` once the answer has been sent.
    pending: Option<Vec<IceCandidate>>,
}

impl Outbound {
    fn new(remote_id: Arc<str>, sink: Arc<dyn SignalSink>) -> Self {
        Outbound {
            remote_id,
            sink,
            state: Mutex::new(OutboundState {
                closed: false,
                pending: Some(Vec::new()),
            }),
        }
    }

    async fn description(&self, answer: SessionDescription) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        self.emit(SignalingMessage::answer(&*self.remote_id, answer));
        info!(target: TARGET, "answer_sent remote={}", self.remote_id);
        if let Some(pending) = state.pending.take() {
            for candidate in pending {
                self.emit(SignalingMessage::candidate_for(&*self.remote_id, candidate));
            }
        }
    }

    async fn candidate(&self, candidate: IceCandidate) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        match &mut state.pending {
            Some(pending) => pending.push(candidate),
            None => {
                self.emit(SignalingMessage::candidate_for(&*self.remote_id, candidate));
                debug!(target: TARGET, "candidate_sent remote={}", self.remote_id);
            }
        }
    }

    async fn shut(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.pending = None;
    }

    fn emit(&self, message: SignalingMessage) {
        if let Err(e) = self.sink.send(message) {
            warn!(target: TARGET, "signal_dropped remote={} error={}", self.remote_id, e);
        }
    }
}

#[repr(transparent)]
#[derive(Debug, Clone)]
struct SessionStatus(Arc<ArcSwap<SessionState>>);

impl SessionStatus {
    fn get(&self) -> arc_swap::Guard<Arc<SessionState>> {
        self.0.load()
    }

    /// Returns `true` if the session moved from negotiating to connected.
    fn set_connected(&self) -> bool {
        let old = self.0.rcu(|old| match **old {
            SessionState::Negotiating => Arc::new(SessionState::Connected),
            _ => old.clone(),
        });
        *old == SessionState::Negotiating
    }

    /// Returns `true` if this call is the one that closed the session.
    fn set_closed(&self) -> bool {
        let old = self.0.swap(Arc::new(SessionState::Closed));
        !old.is_closed()
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus(Arc::new(ArcSwap::from_pointee(SessionState::Negotiating)))
    }
}

impl SessionState {
    fn is_closed(&self) -> bool {
        *self == SessionState::Closed
    }
}
