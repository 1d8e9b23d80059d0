//! Peer negotiation engine
//!
//! Wraps `webrtc::RTCPeerConnection` for one call: offer/answer flows,
//! candidate queueing, the reliable chat channel, and local media handles.
//! One negotiation flow at a time per call; callers serialize.

mod candidates;
mod chat;
mod media;

pub use candidates::CandidateQueue;
pub use chat::{ChannelChat, ChatDeduper, ChatPath};
pub use media::LocalMedia;

use crate::ice::IceServerDescriptor;
use crate::monitor::{QualitySample, StatsSource};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex as PlMutex;
use parking_lot::RwLock as PlRwLock;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;

/// Call-level negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No description exchanged yet
    New,
    /// Local offer set, awaiting the answer
    HaveLocalOffer,
    /// Remote offer set, answer produced
    HaveRemoteOffer,
    /// Transport up
    Connected,
    /// Transport failed
    Failed,
    /// Torn down
    Closed,
}

type StateHandler = Arc<dyn Fn(CallState) + Send + Sync>;
type ChatHandler = Arc<dyn Fn(ChannelChat) + Send + Sync>;
type CandidateHandler = Arc<dyn Fn(RTCIceCandidateInit) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_state: PlMutex<Option<StateHandler>>,
    on_chat: PlMutex<Option<ChatHandler>>,
}

/// One peer connection and its side-channel for a single call
pub struct NegotiationEngine {
    pc: Arc<RTCPeerConnection>,
    state: Arc<PlRwLock<CallState>>,
    candidates: AsyncMutex<CandidateQueue>,
    chat_channel: Arc<AsyncRwLock<Option<Arc<RTCDataChannel>>>>,
    dedupe: Arc<PlMutex<ChatDeduper>>,
    media: LocalMedia,
    handlers: Arc<Handlers>,
}

impl NegotiationEngine {
    /// Build a peer connection from an ICE descriptor snapshot
    pub async fn new(ice_servers: &[IceServerDescriptor]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("codec registration failed: {}", e)))?;

        let interceptors = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::Negotiation(format!("interceptor registration failed: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Negotiation(format!("peer connection failed: {}", e)))?,
        );

        let state = Arc::new(PlRwLock::new(CallState::New));
        let handlers = Arc::new(Handlers::default());
        let chat_channel = Arc::new(AsyncRwLock::new(None));
        let dedupe = Arc::new(PlMutex::new(ChatDeduper::new(512)));

        // Transport state drives the terminal call states
        let state_cb = Arc::clone(&state);
        let handlers_cb = Arc::clone(&handlers);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state = Arc::clone(&state_cb);
            let handlers = Arc::clone(&handlers_cb);
            Box::pin(async move {
                let next = match s {
                    RTCPeerConnectionState::Connected => CallState::Connected,
                    RTCPeerConnectionState::Failed => CallState::Failed,
                    RTCPeerConnectionState::Closed => CallState::Closed,
                    _ => return,
                };

                let changed = {
                    let mut current = state.write();
                    if *current == next {
                        false
                    } else {
                        debug!("call state {:?} -> {:?}", *current, next);
                        *current = next;
                        true
                    }
                };

                if changed {
                    let handler = handlers.on_state.lock().clone();
                    if let Some(handler) = handler {
                        handler(next);
                    }
                }
            })
        }));

        // Responder side receives the chat channel from the initiator
        let channel_cb = Arc::clone(&chat_channel);
        let dedupe_cb = Arc::clone(&dedupe);
        let handlers_cb = Arc::clone(&handlers);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let channel = Arc::clone(&channel_cb);
            let dedupe = Arc::clone(&dedupe_cb);
            let handlers = Arc::clone(&handlers_cb);
            Box::pin(async move {
                if dc.label() != "chat" {
                    warn!(label = dc.label(), "unexpected data channel ignored");
                    return;
                }
                info!("chat channel received");
                wire_inbound_chat(&dc, dedupe, handlers);
                *channel.write().await = Some(dc);
            })
        }));

        Ok(Self {
            pc,
            state,
            candidates: AsyncMutex::new(CandidateQueue::new()),
            chat_channel,
            dedupe,
            media: LocalMedia::new(),
            handlers,
        })
    }

    /// Current call state
    pub fn state(&self) -> CallState {
        *self.state.read()
    }

    /// Register the call-state observer. At most one handler; registering
    /// again replaces the previous one.
    pub fn on_state_change(&self, handler: impl Fn(CallState) + Send + Sync + 'static) {
        *self.handlers.on_state.lock() = Some(Arc::new(handler));
    }

    /// Register the inbound-chat observer; deduplicated messages only
    pub fn on_chat(&self, handler: impl Fn(ChannelChat) + Send + Sync + 'static) {
        *self.handlers.on_chat.lock() = Some(Arc::new(handler));
    }

    /// Register the local-candidate observer; each gathered candidate goes to
    /// the signaling link
    pub fn on_local_candidate(&self, handler: impl Fn(RTCIceCandidateInit) + Send + Sync + 'static) {
        let handler: CandidateHandler = Arc::new(handler);
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => handler(init),
                    Err(e) => warn!("candidate serialization failed: {}", e),
                }
            })
        }));
    }

    /// Open the chat channel; initiator side, before creating the offer
    pub async fn open_chat_channel(&self) -> Result<()> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel("chat", Some(init))
            .await
            .map_err(|e| Error::Negotiation(format!("chat channel failed: {}", e)))?;

        wire_inbound_chat(&dc, Arc::clone(&self.dedupe), Arc::clone(&self.handlers));
        *self.chat_channel.write().await = Some(dc);
        Ok(())
    }

    /// Produce the local offer; initiator side
    pub async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("create_offer failed: {}", e)))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("set_local_description failed: {}", e)))?;

        self.transition(CallState::HaveLocalOffer);
        Ok(sdp)
    }

    /// Apply the remote offer and produce the answer; responder side
    pub async fn accept_offer(&self, sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::Negotiation(format!("malformed offer: {}", e)))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("set_remote_description failed: {}", e)))?;
        self.transition(CallState::HaveRemoteOffer);
        self.drain_candidates().await;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("create_answer failed: {}", e)))?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("set_local_description failed: {}", e)))?;
        Ok(sdp)
    }

    /// Apply the remote answer; initiator side
    pub async fn accept_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::Negotiation(format!("malformed answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("set_remote_description failed: {}", e)))?;
        self.drain_candidates().await;
        Ok(())
    }

    /// Apply a remote candidate, queueing it when the remote description has
    /// not landed yet. Individual apply failures are logged and skipped.
    pub async fn add_remote_candidate(&self, init: RTCIceCandidateInit) {
        let direct = self.candidates.lock().await.push(init);
        if let Some(candidate) = direct {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("candidate rejected: {}", e);
            }
        }
    }

    /// Remote candidates still waiting for the remote description
    pub async fn pending_candidates(&self) -> usize {
        self.candidates.lock().await.pending()
    }

    /// Which path a chat message would take right now
    pub async fn chat_path(&self) -> ChatPath {
        let open = self
            .chat_channel
            .read()
            .await
            .as_ref()
            .map(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false);
        ChatPath::select(open)
    }

    /// Send chat over the data channel when open; returns `Relayed` when the
    /// caller must route through the signaling link instead. Exactly one path
    /// carries each message.
    pub async fn send_chat(&self, chat: &ChannelChat) -> Result<ChatPath> {
        match self.chat_path().await {
            ChatPath::DataChannel => {
                let dc = self
                    .chat_channel
                    .read()
                    .await
                    .clone()
                    .ok_or_else(|| Error::Transport("chat channel gone".to_string()))?;
                dc.send_text(serde_json::to_string(chat)?)
                    .await
                    .map_err(|e| Error::Transport(format!("chat send failed: {}", e)))?;
                Ok(ChatPath::DataChannel)
            }
            ChatPath::Relayed => Ok(ChatPath::Relayed),
        }
    }

    /// Dedupe gate for chat arriving over the signaling relay. Shares the
    /// seen-id set with the data channel, so a message that crossed both
    /// paths surfaces once. True means deliver.
    pub fn accept_relayed_chat(&self, chat: &ChannelChat) -> bool {
        self.dedupe.lock().accept(&chat.id)
    }

    /// Local media handles
    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    /// Add local tracks to the connection; call before creating the offer
    pub async fn attach_media(&self, audio: bool, video: bool) -> Result<()> {
        if audio {
            let track = self.media.ensure_audio();
            self.pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::MediaAccess(format!("audio track rejected: {}", e)))?;
        }
        if video {
            let track = self.media.ensure_video();
            self.pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::MediaAccess(format!("video track rejected: {}", e)))?;
        }
        Ok(())
    }

    /// Tear the call down: chat channel, tracks, peer connection, callbacks.
    /// Callable at any state; never raises.
    pub async fn close(&self) {
        if let Some(dc) = self.chat_channel.write().await.take() {
            if let Err(e) = dc.close().await {
                debug!("chat channel close: {}", e);
            }
        }
        self.media.clear();
        *self.handlers.on_state.lock() = None;
        *self.handlers.on_chat.lock() = None;

        if let Err(e) = self.pc.close().await {
            debug!("peer connection close: {}", e);
        }
        *self.state.write() = CallState::Closed;
    }

    async fn drain_candidates(&self) {
        let drained = self.candidates.lock().await.mark_remote_set();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "applying queued candidates");
        for candidate in drained {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("queued candidate rejected: {}", e);
            }
        }
    }

    fn transition(&self, next: CallState) {
        let changed = {
            let mut state = self.state.write();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            let handler = self.handlers.on_state.lock().clone();
            if let Some(handler) = handler {
                handler(next);
            }
        }
    }
}

#[async_trait]
impl StatsSource for NegotiationEngine {
    async fn sample(&self) -> Result<Option<QualitySample>> {
        let report = self.pc.get_stats().await;

        let mut nominated = None;
        let mut worst_loss: f64 = 0.0;
        let mut worst_jitter: f64 = 0.0;
        for stat in report.reports.values() {
            match stat {
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    nominated = Some(pair);
                }
                // Loss and jitter come from the counterpart's receiver
                // reports, one per outbound stream; take the worst
                StatsReportType::RemoteInboundRTP(remote) => {
                    worst_loss = worst_loss.max(remote.fraction_lost);
                    worst_jitter = worst_jitter.max(remote.jitter);
                }
                _ => {}
            }
        }

        Ok(nominated.map(|pair| QualitySample {
            bitrate_kbps: pair.available_outgoing_bitrate / 1000.0,
            rtt_ms: pair.current_round_trip_time * 1000.0,
            packet_loss_pct: worst_loss * 100.0,
            jitter_ms: worst_jitter * 1000.0,
            at: Utc::now(),
        }))
    }
}

fn wire_inbound_chat(dc: &Arc<RTCDataChannel>, dedupe: Arc<PlMutex<ChatDeduper>>, handlers: Arc<Handlers>) {
    dc.on_message(Box::new(move |msg| {
        let dedupe = Arc::clone(&dedupe);
        let handlers = Arc::clone(&handlers);
        Box::pin(async move {
            let chat: ChannelChat = match serde_json::from_slice(&msg.data) {
                Ok(chat) => chat,
                Err(e) => {
                    warn!("unparseable chat payload: {}", e);
                    return;
                }
            };

            if !dedupe.lock().accept(&chat.id) {
                debug!(id = %chat.id, "duplicate chat dropped");
                return;
            }

            let handler = handlers.on_chat.lock().clone();
            if let Some(handler) = handler {
                handler(chat);
            }
        })
    }));
}
