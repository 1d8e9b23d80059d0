//! WebSocket connection handling for the signaling hub
//!
//! One task per connection plus a forward task draining the outbound channel.
//! The per-connection state machine is `Unauthenticated -> Authenticated ->
//! Joined -> Closed`; the first frame must be `auth`, and every failure is
//! answered with a classified `error` frame before anything else happens.

use super::protocol::{ClientFrame, ErrorCode, ServerFrame};
use super::registry::SessionRegistry;
use crate::auth::{Identity, IdentityVerifier};
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// The signaling hub's WebSocket front end
pub struct HubServer {
    registry: Arc<SessionRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
}

/// Per-connection state
struct ConnState {
    identity: Option<Identity>,
    joined: Option<String>,
    remote: String,
}

enum Flow {
    Continue,
    Close,
}

impl HubServer {
    pub fn new(registry: Arc<SessionRegistry>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { registry, verifier }
    }

    /// Accept loop; runs until the listener errors or the task is aborted
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            addr = %listener
                .local_addr()
                .map_err(|e| Error::Transport(e.to_string()))?,
            "signaling hub listening"
        );

        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| Error::Transport(format!("accept failed: {}", e)))?;

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr.to_string()).await {
                    debug!(%addr, "connection closed with error: {}", e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, remote: String) -> Result<()> {
        info!(%remote, "new signaling connection");

        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| Error::Transport(format!("websocket handshake failed: {}", e)))?;
        let (ws_tx, mut ws_rx) = ws_stream.split();

        // Outbound channel for this connection; the registry holds a clone
        // once the party joins a session
        let (tx, mut rx) = mpsc::channel::<String>(128);

        let ws_tx = Arc::new(RwLock::new(ws_tx));
        let ws_tx_forward = Arc::clone(&ws_tx);
        let forward_task = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                let mut ws_tx = ws_tx_forward.write().await;
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!("websocket send failed: {}", e);
                    break;
                }
            }
        });

        let mut conn = ConnState {
            identity: None,
            joined: None,
            remote,
        };

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match self.handle_frame(&text, &mut conn, &tx).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break,
                    Err(e) => {
                        error!(remote = %conn.remote, "frame handling failed: {}", e);
                        send_frame(&tx, &ServerFrame::from_error(&e)).await;
                    }
                },
                Ok(Message::Ping(data)) => {
                    let mut ws_tx = ws_tx.write().await;
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    info!(remote = %conn.remote, "connection closed by client");
                    break;
                }
                Err(e) => {
                    warn!(remote = %conn.remote, "websocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        // Cleanup: a vanished connection is a leave, never an end
        if let (Some(identity), Some(session_id)) = (&conn.identity, &conn.joined) {
            if let Err(e) = self.registry.leave(identity, session_id).await {
                warn!(session_id, "leave on disconnect failed: {}", e);
            }
        }

        forward_task.abort();
        Ok(())
    }

    async fn handle_frame(
        &self,
        text: &str,
        conn: &mut ConnState,
        tx: &mpsc::Sender<String>,
    ) -> Result<Flow> {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                send_frame(
                    tx,
                    &ServerFrame::Error {
                        code: ErrorCode::Invalid,
                        message: format!("malformed frame: {}", e),
                    },
                )
                .await;
                return Ok(Flow::Continue);
            }
        };

        // Authentication gate: the first frame must be auth
        let Some(identity) = conn.identity.clone() else {
            return match frame {
                ClientFrame::Auth { token } => match self.verifier.verify(&token).await {
                    Ok(identity) => {
                        debug!(user_id = %identity.id, remote = %conn.remote, "authenticated");
                        send_frame(
                            tx,
                            &ServerFrame::AuthOk {
                                user_id: identity.id.clone(),
                            },
                        )
                        .await;
                        conn.identity = Some(identity);
                        Ok(Flow::Continue)
                    }
                    Err(e) => {
                        warn!(remote = %conn.remote, "authentication failed: {}", e);
                        send_frame(tx, &ServerFrame::from_error(&e)).await;
                        Ok(Flow::Close)
                    }
                },
                _ => {
                    send_frame(
                        tx,
                        &ServerFrame::Error {
                            code: ErrorCode::Unauthenticated,
                            message: "authenticate first".to_string(),
                        },
                    )
                    .await;
                    Ok(Flow::Close)
                }
            };
        };

        match frame {
            ClientFrame::Auth { .. } => {
                send_frame(
                    tx,
                    &ServerFrame::Error {
                        code: ErrorCode::Conflict,
                        message: "already authenticated".to_string(),
                    },
                )
                .await;
            }
            ClientFrame::CreateSession {
                counterpart,
                linkage_id,
            } => {
                match self
                    .registry
                    .create_session(&identity, &counterpart, linkage_id)
                    .await
                {
                    Ok((session, existing)) => {
                        send_frame(tx, &ServerFrame::SessionCreated { session, existing }).await;
                    }
                    Err(e) => send_frame(tx, &ServerFrame::from_error(&e)).await,
                }
            }
            ClientFrame::JoinSession { session_id } => {
                match self.registry.join(&identity, &session_id, tx.clone()).await {
                    Ok(ack) => {
                        conn.joined = Some(session_id);
                        send_frame(
                            tx,
                            &ServerFrame::Joined {
                                session: ack.session,
                                role: ack.role,
                                ice_servers: ack.ice_servers,
                            },
                        )
                        .await;
                    }
                    Err(e) => send_frame(tx, &ServerFrame::from_error(&e)).await,
                }
            }
            relayable @ (ClientFrame::Offer { .. }
            | ClientFrame::Answer { .. }
            | ClientFrame::IceCandidate { .. }
            | ClientFrame::Chat { .. }) => {
                let Some(session_id) = conn.joined.clone() else {
                    send_frame(
                        tx,
                        &ServerFrame::Error {
                            code: ErrorCode::Forbidden,
                            message: "join a session before relaying".to_string(),
                        },
                    )
                    .await;
                    return Ok(Flow::Continue);
                };

                if let Err(e) = self.registry.relay(&identity, &session_id, relayable).await {
                    send_frame(tx, &ServerFrame::from_error(&e)).await;
                }
            }
            ClientFrame::EndSession => {
                let Some(session_id) = conn.joined.clone() else {
                    send_frame(
                        tx,
                        &ServerFrame::Error {
                            code: ErrorCode::Forbidden,
                            message: "join a session before ending it".to_string(),
                        },
                    )
                    .await;
                    return Ok(Flow::Continue);
                };

                match self.registry.end_session(&identity, &session_id).await {
                    // The session_ended frame is broadcast by the registry
                    Ok(_) => conn.joined = None,
                    Err(e) => send_frame(tx, &ServerFrame::from_error(&e)).await,
                }
            }
            ClientFrame::Leave => {
                if let Some(session_id) = conn.joined.take() {
                    if let Err(e) = self.registry.leave(&identity, &session_id).await {
                        send_frame(tx, &ServerFrame::from_error(&e)).await;
                    }
                }
            }
        }

        Ok(Flow::Continue)
    }
}

async fn send_frame(tx: &mpsc::Sender<String>, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            if let Err(e) = tx.send(text).await {
                debug!("outbound channel closed: {}", e);
            }
        }
        Err(e) => error!("frame serialization failed: {}", e),
    }
}
