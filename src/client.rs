use crate::codec::{encode_within, Frame, FrameEncoder, JpegCodec};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::session::{build_api, PeerSession};
use crate::signal::{IceCandidate, SessionDescription, SignalingMessage};
use crate::signaling::{SignalSink, SignalingLink};
use arc_swap::ArcSwapOption;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::API;

const TARGET: &str = "wrtc_cast::client";

/// Media-sending side of a single-peer WebRTC stream.
///
/// Owns the signaling link and at most one [PeerSession]. Every inbound offer replaces the current
/// session: the previous one is closed before the new one starts negotiating, so two sessions
/// never coexist. Frames pushed through [Client::send_frame] go to whichever session currently
/// has an open data channel.
pub struct Client {
    id: Arc<str>,
    options: Options,
    api: API,
    sink: Arc<dyn SignalSink>,
    link: Option<Arc<SignalingLink>>,
    session: ArcSwapOption<PeerSession>,
    /// Serializes session replacement. Readers go through `session` without taking it.
    replacing: Mutex<()>,
    encoder: Box<dyn FrameEncoder>,
}

impl Client {
    /// Connects to the signaling server at `url`, registers `options.client_id` and starts
    /// dispatching inbound signaling messages.
    ///
    /// Fails with [Error::InvalidOptions] before connecting if `options` are out of range, and with
    /// [Error::SignalingUnavailable] if the server cannot be reached.
    pub async fn connect(url: &str, options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        let link = Arc::new(SignalingLink::connect(url, &options.client_id).await?);
        let mut client = Client::new(options, Arc::new(link.sender()))?;
        client.link = Some(link.clone());
        let client = Arc::new(client);

        let weak = Arc::downgrade(&client);
        tokio::spawn(async move {
            while let Some(msg) = link.next().await {
                match weak.upgrade() {
                    Some(client) => client.on_signaling_message(msg).await,
                    None => break,
                }
            }
            debug!(target: TARGET, "dispatch stopped");
        });
        Ok(client)
    }

    /// Creates a client emitting its signaling messages into `sink` instead of a signaling link.
    /// Inbound messages are delivered by calling [Client::on_signaling_message].
    pub fn new(options: Options, sink: Arc<dyn SignalSink>) -> Result<Self> {
        options.validate()?;
        let encoder = Box::new(JpegCodec);
        Ok(Client {
            id: Arc::from(options.client_id.as_str()),
            api: build_api()?,
            options,
            sink,
            link: None,
            session: ArcSwapOption::empty(),
            replacing: Mutex::new(()),
            encoder,
        })
    }

    /// Replaces the JPEG encoder used by [Client::send_frame].
    pub fn with_encoder<E: FrameEncoder + 'static>(mut self, encoder: E) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.id
    }

    pub fn current_session(&self) -> Option<Arc<PeerSession>> {
        self.session.load_full()
    }

    /// Routes one inbound signaling message. Nothing here fails: messages that cannot be applied
    /// are logged and dropped.
    pub async fn on_signaling_message(&self, msg: SignalingMessage) {
        match msg {
            SignalingMessage::Offer { from, offer } => {
                info!(target: TARGET, "offer from={}", from);
                if let Err(e) = self.accept_offer(&from, &offer).await {
                    warn!(target: TARGET, "offer_rejected from={} error={}", from, e);
                }
            }
            SignalingMessage::IceCandidate { from, candidate, .. } => {
                if let Err(e) = self.add_remote_candidate(from.as_deref(), &candidate).await {
                    debug!(target: TARGET, "candidate_dropped error={}", e);
                }
            }
            SignalingMessage::Connection { client_id, status } => {
                info!(
                    target: TARGET,
                    "registered client_id={} status={}",
                    client_id,
                    status.as_deref().unwrap_or("-")
                );
            }
            SignalingMessage::Error { message } => {
                warn!(target: TARGET, "server_error message={}", message);
            }
            other => trace!(target: TARGET, "ignored type={}", other.kind()),
        }
    }

    async fn accept_offer(&self, from: &str, offer: &SessionDescription) -> Result<()> {
        let _replacing = self.replacing.lock().await;
        if let Some(old) = self.session.swap(None) {
            info!(target: TARGET, "session_replaced remote={}", old.remote_id());
            if let Err(e) = old.close().await {
                warn!(target: TARGET, "close_failed remote={} error={}", old.remote_id(), e);
            }
        }
        let session = PeerSession::accept(
            &self.api,
            self.options.rtc_config(),
            from,
            offer,
            self.sink.clone(),
        )
        .await?;
        self.session.store(Some(session));
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        from: Option<&str>,
        candidate: &IceCandidate,
    ) -> Result<()> {
        let session = match self.session.load_full() {
            Some(session) => session,
            None => {
                debug!(target: TARGET, "candidate_discarded reason=no session");
                return Ok(());
            }
        };
        if let Some(from) = from {
            if from != session.remote_id() {
                return Err(Error::ProtocolViolation(format!(
                    "candidate from {} while negotiating with {}",
                    from,
                    session.remote_id()
                )));
            }
        }
        session.add_remote_candidate(candidate).await?;
        Ok(())
    }

    /// Encodes `frame` and sends it over the current data channel.
    ///
    /// Frames are encoded at the configured JPEG quality. A payload larger than
    /// `options.max_message_size` is re-encoded at halved quality until it fits.
    ///
    /// Returns `true` if the encoded payload was handed to the channel. Without a session, without
    /// an open channel, or when encoding or sending fails, nothing is sent and `false` is returned;
    /// failures are logged, never raised.
    pub async fn send_frame(&self, frame: &Frame) -> bool {
        let channel = match self.session.load_full().and_then(|s| s.data_channel()) {
            Some(channel) if channel.is_open() => channel,
            _ => return false,
        };
        let payload = match encode_within(
            &*self.encoder,
            frame,
            self.options.jpeg_quality,
            self.options.max_message_size,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: TARGET, "frame_dropped error={}", e);
                return false;
            }
        };
        match channel.send(&payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!(target: TARGET, "frame_send_failed len={} error={}", payload.len(), e);
                false
            }
        }
    }

    /// Closes the current session and the signaling link.
    pub async fn close(&self) -> Result<()> {
        let _replacing = self.replacing.lock().await;
        if let Some(link) = &self.link {
            link.close();
        }
        if let Some(session) = self.session.swap(None) {
            session.close().await?;
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.close();
        }
        if let Some(session) = self.session.swap(None) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = session.close().await;
                });
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("session", &self.session.load_full())
            .finish()
    }
}
