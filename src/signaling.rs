use crate::error::{Error, Result};
use crate::signal::SignalingMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const TARGET: &str = "wrtc_cast::signaling";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the signaling channel. Peer sessions only ever see this capability, never the
/// transport itself.
pub trait SignalSink: Send + Sync {
    fn send(&self, message: SignalingMessage) -> Result<()>;
}

/// Cloneable handle queueing messages for the signaling link's writer task.
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: UnboundedSender<Message>,
}

impl SignalSink for SignalingSender {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        let text = message.to_json()?;
        trace!(target: TARGET, "send type={}", message.kind());
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::SignalingUnavailable("signaling link closed".into()))
    }
}

/// WebSocket connection to the signaling server.
///
/// Inbound text frames are parsed into [SignalingMessage]s and handed out, in arrival order, by
/// [SignalingLink::next]. Binary frames and messages that fail to parse are dropped.
pub struct SignalingLink {
    sender: SignalingSender,
    inbound: Mutex<UnboundedReceiver<SignalingMessage>>,
    closed: AtomicBool,
}

impl SignalingLink {
    /// Opens the WebSocket connection and registers `client_id` with the server.
    ///
    /// Suspends until the handshake either completes or fails. There is no timeout: if the server
    /// accepts the TCP connection but never answers the handshake, this never returns.
    pub async fn connect(url: &str, client_id: &str) -> Result<Self> {
        info!(target: TARGET, "connecting url={}", url);
        let (ws, _) = connect_async(url).await.map_err(|e| {
            warn!(target: TARGET, "connect_failed url={} error={}", url, e);
            Error::SignalingUnavailable(e.to_string())
        })?;
        info!(target: TARGET, "open url={}", url);

        let (write, read) = ws.split();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let (inbound_tx, inbound_rx) = unbounded_channel();
        tokio::spawn(write_loop(write, outbound_rx));
        tokio::spawn(read_loop(read, inbound_tx));

        let link = SignalingLink {
            sender: SignalingSender { tx: outbound_tx },
            inbound: Mutex::new(inbound_rx),
            closed: AtomicBool::new(false),
        };
        link.send(SignalingMessage::connection(client_id))?;
        info!(target: TARGET, "registered client_id={}", client_id);
        Ok(link)
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        self.sender.send(message)
    }

    /// Waits for the next inbound message. Returns `None` once the connection is gone.
    pub async fn next(&self) -> Option<SignalingMessage> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Starts the closing handshake. Subsequent calls do nothing.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(target: TARGET, "closing");
            let _ = self.sender.tx.send(Message::Close(None));
        }
    }
}

impl std::fmt::Debug for SignalingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingLink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop(mut write: SplitSink<WsStream, Message>, mut rx: UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let closing = msg.is_close();
        if let Err(e) = write.send(msg).await {
            warn!(target: TARGET, "write_failed error={}", e);
            break;
        }
        if closing {
            break;
        }
    }
    debug!(target: TARGET, "writer stopped");
}

async fn read_loop(mut read: SplitStream<WsStream>, tx: UnboundedSender<SignalingMessage>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalingMessage::parse(&text) {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => debug!(target: TARGET, "dropped error={}", e),
            },
            Ok(Message::Binary(data)) => {
                trace!(target: TARGET, "ignored binary len={}", data.len());
            }
            Ok(Message::Close(_)) => {
                info!(target: TARGET, "closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: TARGET, "read_failed error={}", e);
                break;
            }
        }
    }
    debug!(target: TARGET, "reader stopped");
}
