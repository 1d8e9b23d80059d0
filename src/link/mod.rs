//! Client-side signaling link
//!
//! Owns the WebSocket to the hub: auth + join handshake, heartbeat, and a
//! bounded-backoff reconnect loop. Sends while disconnected are dropped with
//! a warning instead of failing; callers re-send after the link reports
//! `Connected` again.

use crate::config::LinkConfig;
use crate::hub::{ClientFrame, ErrorCode, JoinAck, ServerFrame};
use crate::ice::IceServerDescriptor;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// Link connectivity, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport; initial state, or lost and awaiting reconnect
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Authenticated and joined
    Connected,
    /// Reconnect attempts exhausted
    Failed,
}

#[derive(Clone)]
struct ConnectParams {
    url: String,
    token: String,
    session_id: String,
}

/// Signaling link to the hub for one session
pub struct SignalingLink {
    config: LinkConfig,
    state_tx: watch::Sender<LinkState>,
    events_tx: mpsc::UnboundedSender<ServerFrame>,
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    params: RwLock<Option<ConnectParams>>,
    last_ice: RwLock<Vec<IceServerDescriptor>>,
    last_heartbeat: RwLock<Option<Instant>>,
    reconnect_attempts: AtomicU32,
    closed: AtomicBool,
}

impl SignalingLink {
    /// Create a disconnected link; returns the link, the inbound frame
    /// receiver, and the state watch
    pub fn new(
        config: LinkConfig,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<ServerFrame>,
        watch::Receiver<LinkState>,
    ) {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let link = Arc::new(Self {
            config,
            state_tx,
            events_tx,
            outbound: RwLock::new(None),
            params: RwLock::new(None),
            last_ice: RwLock::new(Vec::new()),
            last_heartbeat: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });

        (link, events_rx, state_rx)
    }

    /// Connect, authenticate, and join the session
    ///
    /// Resolves with the join acknowledgement (session detail plus the ICE
    /// descriptor snapshot) or a classified error. Authorization failures are
    /// terminal; transport failures here are too, the reconnect loop only
    /// covers a link that was once up.
    pub async fn connect(
        self: &Arc<Self>,
        url: &str,
        token: &str,
        session_id: &str,
    ) -> Result<JoinAck> {
        *self.params.write() = Some(ConnectParams {
            url: url.to_string(),
            token: token.to_string(),
            session_id: session_id.to_string(),
        });
        self.closed.store(false, Ordering::SeqCst);
        self.establish().await
    }

    /// Current connectivity
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// ICE descriptors from the most recent join ack
    pub fn last_ice_snapshot(&self) -> Vec<IceServerDescriptor> {
        self.last_ice.read().clone()
    }

    /// Reconnect attempts since the link was last up
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Instant of the last heartbeat pong
    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self.last_heartbeat.read()
    }

    /// Relay an SDP offer
    pub fn send_offer(&self, sdp: String) -> Result<()> {
        self.send(&ClientFrame::Offer { sdp })
    }

    /// Relay an SDP answer
    pub fn send_answer(&self, sdp: String) -> Result<()> {
        self.send(&ClientFrame::Answer { sdp })
    }

    /// Relay a network-path candidate
    pub fn send_candidate(
        &self,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<()> {
        self.send(&ClientFrame::IceCandidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        })
    }

    /// Relay a chat message; the id is the receiver's dedupe key
    pub fn send_chat(&self, message_id: String, body: String) -> Result<()> {
        self.send(&ClientFrame::Chat { message_id, body })
    }

    /// Ask the hub to terminate the session
    pub fn send_end_session(&self) -> Result<()> {
        self.send(&ClientFrame::EndSession)
    }

    /// Shut the link down; no reconnect will follow
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(tx) = self.outbound.write().take() {
            // A close frame lets the hub see the leave instead of a dead TCP
            // stream lingering until its own timeout
            let _ = tx.send(Message::Close(None));
        }
        let _ = self.state_tx.send_replace(LinkState::Disconnected);
    }

    /// Dropped-when-disconnected send policy
    fn send(&self, frame: &ClientFrame) -> Result<()> {
        let tx = self.outbound.read().clone();
        let Some(tx) = tx else {
            warn!("link disconnected, frame dropped");
            return Ok(());
        };

        let text = serde_json::to_string(frame)?;
        if tx.send(Message::Text(text)).is_err() {
            warn!("link transport gone, frame dropped");
            self.outbound.write().take();
        }
        Ok(())
    }

    async fn establish(self: &Arc<Self>) -> Result<JoinAck> {
        let _ = self.state_tx.send_replace(LinkState::Connecting);
        match self.handshake().await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                // Rejections the hub will repeat are final; anything else
                // leaves the link eligible for another attempt
                let next = if is_terminal(&e) {
                    LinkState::Failed
                } else {
                    LinkState::Disconnected
                };
                let _ = self.state_tx.send_replace(next);
                Err(e)
            }
        }
    }

    async fn handshake(self: &Arc<Self>) -> Result<JoinAck> {
        let params = self
            .params
            .read()
            .clone()
            .ok_or_else(|| Error::Transport("no connect parameters".to_string()))?;

        info!(url = %params.url, session_id = %params.session_id, "connecting to hub");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(&params.url))
            .await
            .map_err(|_| Error::Transport("connect timed out".to_string()))?
            .map_err(|e| Error::Transport(format!("connect failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        // Auth then join; both acks must arrive within the connect timeout
        send_client_frame(
            &mut write,
            &ClientFrame::Auth {
                token: params.token.clone(),
            },
        )
        .await?;
        match next_frame(&mut read, timeout).await? {
            ServerFrame::AuthOk { .. } => {}
            ServerFrame::Error { code, message } => return Err(wire_error(code, message)),
            other => {
                return Err(Error::Negotiation(format!(
                    "unexpected handshake frame: {:?}",
                    other
                )))
            }
        }

        send_client_frame(
            &mut write,
            &ClientFrame::JoinSession {
                session_id: params.session_id.clone(),
            },
        )
        .await?;
        let ack = loop {
            match next_frame(&mut read, timeout).await? {
                ServerFrame::Joined {
                    session,
                    role,
                    ice_servers,
                } => {
                    break JoinAck {
                        session,
                        role,
                        ice_servers,
                    }
                }
                ServerFrame::Error { code, message } => return Err(wire_error(code, message)),
                other => {
                    // Frames racing the join ack still reach the consumer
                    let _ = self.events_tx.send(other);
                }
            }
        };

        *self.last_ice.write() = ack.ice_servers.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.write() = Some(tx.clone());
        tokio::spawn(sender_task(write, rx));
        tokio::spawn(reader_task(read, Arc::clone(self)));
        tokio::spawn(heartbeat_task(
            Arc::clone(self),
            tx,
            Duration::from_millis(self.config.heartbeat_interval_ms),
        ));

        self.reconnect_attempts.store(0, Ordering::Relaxed);
        let _ = self.state_tx.send_replace(LinkState::Connected);
        info!(session_id = %params.session_id, "link connected");

        Ok(ack)
    }

    // Boxed rather than `async fn`: the future cycle (handshake spawns
    // reader_task, which spawns reconnect_loop, which awaits handshake)
    // prevents the compiler from resolving `Send` for the opaque types.
    fn reconnect_loop(self: Arc<Self>) -> futures::future::BoxFuture<'static, ()> {
        Box::pin(async move {
            for attempt in 1..=self.config.max_reconnect_attempts {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }

                self.reconnect_attempts.store(attempt, Ordering::Relaxed);
                let delay = backoff_delay(&self.config, attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "link reconnecting");
                tokio::time::sleep(delay).await;

                match self.establish().await {
                    Ok(_) => return,
                    Err(e) if is_terminal(&e) => {
                        error!(attempt, "reconnect rejected: {}", e);
                        return;
                    }
                    Err(e) => warn!(attempt, "reconnect failed: {}", e),
                }
            }

            error!(
                attempts = self.config.max_reconnect_attempts,
                "reconnect attempts exhausted"
            );
            let _ = self.state_tx.send_replace(LinkState::Failed);
        })
    }
}

/// Errors the hub will repeat on every retry
fn is_terminal(e: &Error) -> bool {
    matches!(
        e,
        Error::Authentication(_)
            | Error::Forbidden(_)
            | Error::NotFound(_)
            | Error::SessionEnded(_)
    )
}

/// Exponential backoff: base doubled per attempt, capped
fn backoff_delay(config: &LinkConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = config
        .reconnect_base_ms
        .saturating_mul(1u64 << exp)
        .min(config.reconnect_max_ms);
    Duration::from_millis(ms)
}

fn wire_error(code: ErrorCode, message: String) -> Error {
    match code {
        ErrorCode::NotFound => Error::NotFound(message),
        ErrorCode::Forbidden => Error::Forbidden(message),
        ErrorCode::Conflict => Error::Conflict(message),
        ErrorCode::Ended => Error::SessionEnded(message),
        ErrorCode::Unauthenticated => Error::Authentication(message),
        ErrorCode::RateLimited => Error::RateLimited(message),
        ErrorCode::Invalid => Error::Negotiation(message),
        ErrorCode::Internal => Error::Transport(message),
    }
}

async fn send_client_frame(write: &mut WsSink, frame: &ClientFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| Error::Transport(format!("send failed: {}", e)))
}

async fn next_frame(read: &mut WsSource, timeout: Duration) -> Result<ServerFrame> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let msg = tokio::time::timeout_at(deadline, read.next())
            .await
            .map_err(|_| Error::Transport("handshake timed out".to_string()))?
            .ok_or_else(|| Error::Transport("connection closed during handshake".to_string()))?
            .map_err(|e| Error::Transport(format!("websocket error: {}", e)))?;

        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(_) => {
                return Err(Error::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
            _ => continue,
        }
    }
}

async fn sender_task(mut write: WsSink, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = write.send(msg).await {
            error!("link send failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    debug!("link sender task terminated");
}

async fn reader_task(mut read: WsSource, link: Arc<SignalingLink>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                Ok(frame) => {
                    if matches!(frame, ServerFrame::SessionEnded { .. }) {
                        // The session is gone; a reconnect would only fail
                        debug!("session ended, link will not reconnect");
                        link.closed.store(true, Ordering::SeqCst);
                    }
                    let _ = link.events_tx.send(frame);
                }
                Err(e) => warn!("unparseable frame from hub: {}", e),
            },
            Ok(Message::Pong(_)) => {
                *link.last_heartbeat.write() = Some(Instant::now());
            }
            Ok(Message::Close(_)) => {
                info!("hub closed the connection");
                break;
            }
            Err(e) => {
                warn!("link transport error: {}", e);
                break;
            }
            _ => {}
        }
    }

    link.outbound.write().take();
    if link.closed.load(Ordering::SeqCst) {
        let _ = link.state_tx.send_replace(LinkState::Disconnected);
    } else {
        let _ = link.state_tx.send_replace(LinkState::Disconnected);
        tokio::spawn(Arc::clone(&link).reconnect_loop());
    }
}

async fn heartbeat_task(
    link: Arc<SignalingLink>,
    tx: mpsc::UnboundedSender<Message>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; skip it so the ping cadence starts after
    // one full interval
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if link.closed.load(Ordering::SeqCst) {
            break;
        }
        // Only the transport currently registered on the link gets pinged;
        // a stale clone from a replaced connection must not keep it alive
        let current = link
            .outbound
            .read()
            .as_ref()
            .map(|active| active.same_channel(&tx))
            .unwrap_or(false);
        if !current || tx.send(Message::Ping(Vec::new())).is_err() {
            break;
        }
    }
    debug!("link heartbeat task terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_is_disconnected() {
        let (link, _events, state) = SignalingLink::new(LinkConfig::default());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(*state.borrow(), LinkState::Disconnected);
        assert_eq!(link.reconnect_attempts(), 0);
        assert!(link.last_ice_snapshot().is_empty());
    }

    #[test]
    fn test_sends_while_disconnected_are_noops() {
        let (link, _events, _state) = SignalingLink::new(LinkConfig::default());

        link.send_offer("v=0".to_string()).unwrap();
        link.send_answer("v=0".to_string()).unwrap();
        link.send_candidate("candidate:1".to_string(), None, None).unwrap();
        link.send_chat("m1".to_string(), "hello".to_string()).unwrap();
        link.send_end_session().unwrap();

        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = LinkConfig {
            reconnect_base_ms: 500,
            reconnect_max_ms: 3000,
            ..Default::default()
        };

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(3000));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(3000));
    }

    #[test]
    fn test_wire_error_classification() {
        assert!(matches!(
            wire_error(ErrorCode::Ended, "s1".to_string()),
            Error::SessionEnded(_)
        ));
        assert!(matches!(
            wire_error(ErrorCode::Unauthenticated, "bad".to_string()),
            Error::Authentication(_)
        ));
    }

    #[test]
    fn test_terminal_errors_stop_retrying() {
        assert!(is_terminal(&Error::Authentication("bad token".to_string())));
        assert!(is_terminal(&Error::NotFound("s1".to_string())));
        assert!(is_terminal(&Error::SessionEnded("s1".to_string())));
        assert!(!is_terminal(&Error::Transport("reset".to_string())));
        assert!(!is_terminal(&Error::RateLimited("slow down".to_string())));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_hub_fails() {
        let config = LinkConfig {
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let (link, _events, _state) = SignalingLink::new(config);

        let result = link.connect("ws://127.0.0.1:1", "token", "s1").await;
        assert!(matches!(result, Err(Error::Transport(_))));
        // A failed connect must not leave the watch stuck on Connecting
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
