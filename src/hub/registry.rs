//! Session registry: lifecycle, relay, and reaping
//!
//! All session mutations go through a per-session async mutex, so join, end,
//! and relay for one session are serialized while unrelated sessions proceed
//! in parallel. Records are persisted before any frame is forwarded; a relay
//! whose counterpart is offline is persisted-but-undelivered, never an error.

use super::metrics::HubMetrics;
use super::protocol::{ClientFrame, ServerFrame};
use super::rate_limit::RateLimiter;
use crate::auth::Identity;
use crate::config::HubConfig;
use crate::ice::{IceProvider, IceServerDescriptor};
use crate::store::{
    ChatKind, ChatMessage, MessageStore, NegotiationKind, NegotiationRecord, PartyRole, Session,
    SessionStatus, SessionStore,
};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

/// Everything a joining party needs to start negotiating
#[derive(Debug, Clone)]
pub struct JoinAck {
    pub session: Session,
    pub role: PartyRole,
    pub ice_servers: Vec<IceServerDescriptor>,
}

/// Live connections for one session: party id to its outbound channel
type SessionPeers = HashMap<String, mpsc::Sender<String>>;

/// Shared hub state behind the signaling connections
pub struct SessionRegistry {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    ice: Arc<IceProvider>,
    config: HubConfig,
    metrics: Arc<HubMetrics>,
    peers: RwLock<HashMap<String, SessionPeers>>,
    locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    create_limiter: RateLimiter,
    relay_limiter: RateLimiter,
}

impl SessionRegistry {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        ice: Arc<IceProvider>,
        config: HubConfig,
    ) -> Self {
        let window = Duration::from_secs(config.rate_window_secs);
        Self {
            sessions,
            messages,
            ice,
            metrics: Arc::new(HubMetrics::new()),
            peers: RwLock::new(HashMap::new()),
            locks: parking_lot::Mutex::new(HashMap::new()),
            create_limiter: RateLimiter::new(config.create_limit_per_window, window),
            relay_limiter: RateLimiter::new(config.relay_limit_per_window, window),
            config,
        }
    }

    /// Hub counters
    pub fn metrics(&self) -> Arc<HubMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Create a session between the caller and a counterpart
    ///
    /// Creation is idempotent per open pair: if a created/active session
    /// already exists between the two parties (in either role order), it is
    /// returned with `existing = true` instead of a duplicate.
    pub async fn create_session(
        &self,
        identity: &Identity,
        counterpart: &str,
        linkage_id: Option<String>,
    ) -> Result<(Session, bool)> {
        if !self.create_limiter.check(&identity.id) {
            return Err(Error::RateLimited(format!(
                "session creation budget exhausted for {}",
                identity.id
            )));
        }

        // Serialize creation per pair so concurrent duplicates collapse to one
        let pair_key = pair_lock_key(&identity.id, counterpart);
        let lock = self.entry_lock(&pair_key);
        let _guard = lock.lock().await;

        if let Some(existing) = self
            .sessions
            .find_open_for_pair(&identity.id, counterpart)
            .await?
        {
            debug!(session_id = %existing.id, "open session already exists for pair");
            return Ok((existing, true));
        }

        let session = Session::new(identity.id.clone(), counterpart.to_string(), linkage_id)?;
        self.sessions.insert(session.clone()).await?;
        self.metrics.record_session_created();

        info!(
            session_id = %session.id,
            initiator = %session.initiator,
            responder = %session.responder,
            "session created"
        );

        Ok((session, false))
    }

    /// Join a session as one of its parties, registering the connection's
    /// outbound channel for relayed frames
    pub async fn join(
        &self,
        identity: &Identity,
        session_id: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<JoinAck> {
        let lock = self.entry_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        if session.status == SessionStatus::Ended {
            return Err(Error::SessionEnded(session_id.to_string()));
        }
        let role = session
            .role_of(&identity.id)
            .ok_or_else(|| Error::Forbidden(format!("{} is not a session party", identity.id)))?;

        // Register (or replace, on reconnect) this party's live channel
        let live = {
            let mut peers = self.peers.write().await;
            let entry = peers.entry(session_id.to_string()).or_default();
            entry.insert(identity.id.clone(), tx);
            entry.len()
        };

        // Only the first join flips Created -> Active
        if session.activate(Utc::now()) {
            info!(session_id, "session activated");
        }
        session.participant_count = live.min(2) as u8;
        self.sessions.update(&session).await?;

        self.messages
            .append_negotiation(NegotiationRecord::new(
                session_id,
                &identity.id,
                NegotiationKind::Join,
                String::new(),
            ))
            .await?;
        self.metrics.record_join();

        if let Some(counterpart) = session.counterpart_of(&identity.id) {
            self.forward(
                session_id,
                counterpart,
                &ServerFrame::PeerJoined {
                    user_id: identity.id.clone(),
                    role,
                },
            )
            .await?;
        }

        Ok(JoinAck {
            session,
            role,
            ice_servers: self.ice.healthy_descriptors(),
        })
    }

    /// Relay a negotiation or chat frame to the counterpart
    ///
    /// The audit record (or chat message) is persisted before any forwarding
    /// happens; an offline counterpart leaves the frame persisted-but-
    /// undelivered and the call still succeeds.
    pub async fn relay(
        &self,
        identity: &Identity,
        session_id: &str,
        frame: ClientFrame,
    ) -> Result<()> {
        if !self.relay_limiter.check(&identity.id) {
            self.metrics.record_rejected();
            return Err(Error::RateLimited(format!(
                "relay budget exhausted for {}",
                identity.id
            )));
        }

        let lock = self.entry_lock(session_id);
        let _guard = lock.lock().await;

        let session = self.load(session_id).await?;
        if session.status == SessionStatus::Ended {
            return Err(Error::SessionEnded(session_id.to_string()));
        }
        let role = session
            .role_of(&identity.id)
            .ok_or_else(|| Error::Forbidden(format!("{} is not a session party", identity.id)))?;

        let joined = {
            let peers = self.peers.read().await;
            peers
                .get(session_id)
                .map(|p| p.contains_key(&identity.id))
                .unwrap_or(false)
        };
        if !joined {
            return Err(Error::Forbidden(
                "join the session before relaying".to_string(),
            ));
        }

        let outbound = match frame {
            ClientFrame::Offer { sdp } => {
                self.messages
                    .append_negotiation(NegotiationRecord::new(
                        session_id,
                        &identity.id,
                        NegotiationKind::Offer,
                        sdp.clone(),
                    ))
                    .await?;
                ServerFrame::Offer {
                    sender: identity.id.clone(),
                    sdp,
                }
            }
            ClientFrame::Answer { sdp } => {
                self.messages
                    .append_negotiation(NegotiationRecord::new(
                        session_id,
                        &identity.id,
                        NegotiationKind::Answer,
                        sdp.clone(),
                    ))
                    .await?;
                ServerFrame::Answer {
                    sender: identity.id.clone(),
                    sdp,
                }
            }
            ClientFrame::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.messages
                    .append_negotiation(NegotiationRecord::new(
                        session_id,
                        &identity.id,
                        NegotiationKind::IceCandidate,
                        candidate.clone(),
                    ))
                    .await?;
                ServerFrame::IceCandidate {
                    sender: identity.id.clone(),
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                }
            }
            ClientFrame::Chat { message_id, body } => {
                if body.chars().count() > self.config.max_chat_body_chars {
                    return Err(Error::Negotiation(format!(
                        "chat body exceeds {} characters",
                        self.config.max_chat_body_chars
                    )));
                }
                let message = ChatMessage {
                    id: message_id,
                    session_id: session_id.to_string(),
                    sender: identity.id.clone(),
                    sender_role: role,
                    body,
                    kind: ChatKind::Text,
                    sent_at: Utc::now(),
                };
                self.messages.append_chat(message.clone()).await?;
                self.metrics.record_chat();
                ServerFrame::Chat { message }
            }
            other => {
                return Err(Error::Negotiation(format!(
                    "frame is not relayable: {:?}",
                    other
                )))
            }
        };

        self.metrics.record_relay();

        if let Some(counterpart) = session.counterpart_of(&identity.id) {
            let delivered = self.forward(session_id, counterpart, &outbound).await?;
            if !delivered {
                debug!(session_id, counterpart, "counterpart offline, frame persisted only");
            }
        }

        Ok(())
    }

    /// Terminate a session; either party may end it
    pub async fn end_session(&self, identity: &Identity, session_id: &str) -> Result<Session> {
        let lock = self.entry_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?;
        if !session.is_party(&identity.id) {
            return Err(Error::Forbidden(format!(
                "{} is not a session party",
                identity.id
            )));
        }

        session.end(Utc::now())?;
        session.participant_count = 0;
        self.sessions.update(&session).await?;
        self.metrics.record_session_ended();

        self.messages
            .append_negotiation(NegotiationRecord::new(
                session_id,
                &identity.id,
                NegotiationKind::Leave,
                "ended".to_string(),
            ))
            .await?;

        info!(
            session_id,
            ended_by = %identity.id,
            duration_secs = session.duration_secs.unwrap_or(0),
            "session ended"
        );

        let frame = ServerFrame::SessionEnded {
            session_id: session_id.to_string(),
            ended_by: identity.id.clone(),
            duration_secs: session.duration_secs.unwrap_or(0),
        };
        self.broadcast(session_id, &frame).await?;
        self.drop_session_entry(session_id).await;

        Ok(session)
    }

    /// Deregister a party's connection without ending the session
    ///
    /// Called on explicit leave and on connection loss; idempotent.
    pub async fn leave(&self, identity: &Identity, session_id: &str) -> Result<()> {
        let lock = self.entry_lock(session_id);
        let _guard = lock.lock().await;

        let removed = {
            let mut peers = self.peers.write().await;
            match peers.get_mut(session_id) {
                Some(entry) => entry.remove(&identity.id).is_some(),
                None => false,
            }
        };
        if !removed {
            return Ok(());
        }

        if let Some(mut session) = self.sessions.get(session_id).await? {
            if session.status != SessionStatus::Ended {
                session.participant_count = session.participant_count.saturating_sub(1);
                self.sessions.update(&session).await?;

                self.messages
                    .append_negotiation(NegotiationRecord::new(
                        session_id,
                        &identity.id,
                        NegotiationKind::Leave,
                        String::new(),
                    ))
                    .await?;

                if let Some(counterpart) = session.counterpart_of(&identity.id) {
                    self.forward(
                        session_id,
                        counterpart,
                        &ServerFrame::PeerLeft {
                            user_id: identity.id.clone(),
                        },
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }

    /// End created/active sessions older than the idle threshold
    pub async fn reap_idle(&self) -> Result<usize> {
        let idle = Duration::from_secs(self.config.session_idle_secs);
        let stale = self.sessions.list_open_older_than(idle).await?;
        let mut reaped = 0usize;

        for candidate in stale {
            let lock = self.entry_lock(&candidate.id);
            let _guard = lock.lock().await;

            // Re-read under the lock; a party may have ended it meanwhile
            let Some(mut session) = self.sessions.get(&candidate.id).await? else {
                continue;
            };
            if session.status == SessionStatus::Ended {
                continue;
            }

            session.end(Utc::now())?;
            session.participant_count = 0;
            self.sessions.update(&session).await?;
            self.metrics.record_session_reaped();

            self.messages
                .append_negotiation(
                    NegotiationRecord::new(
                        &session.id,
                        "system",
                        NegotiationKind::Leave,
                        "ended".to_string(),
                    )
                    .with_meta("idle reap".to_string()),
                )
                .await?;

            warn!(session_id = %session.id, "idle session reaped");

            let frame = ServerFrame::SessionEnded {
                session_id: session.id.clone(),
                ended_by: "system".to_string(),
                duration_secs: session.duration_secs.unwrap_or(0),
            };
            self.broadcast(&session.id, &frame).await?;
            self.drop_session_entry(&session.id).await;
            reaped += 1;
        }

        Ok(reaped)
    }

    /// Drop negotiation records past the retention window
    pub async fn sweep_records(&self) -> Result<usize> {
        self.messages
            .sweep_expired(Duration::from_secs(self.config.record_retention_secs))
            .await
    }

    /// Periodic reaper: idle sessions, expired records, stale limiter windows
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = Duration::from_secs(registry.config.reap_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = registry.reap_idle().await {
                    warn!("idle reap failed: {}", e);
                }
                if let Err(e) = registry.sweep_records().await {
                    warn!("record sweep failed: {}", e);
                }
                registry.create_limiter.compact();
                registry.relay_limiter.compact();
                registry.compact_locks();
            }
        })
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    /// Send a frame to one party's live connection; false when offline
    async fn forward(&self, session_id: &str, user_id: &str, frame: &ServerFrame) -> Result<bool> {
        let text = serde_json::to_string(frame)?;
        let tx = {
            let peers = self.peers.read().await;
            peers
                .get(session_id)
                .and_then(|entry| entry.get(user_id))
                .cloned()
        };

        match tx {
            Some(tx) => {
                if let Err(e) = tx.send(text).await {
                    warn!(session_id, user_id, "forward failed: {}", e);
                    return Ok(false);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn broadcast(&self, session_id: &str, frame: &ServerFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        let txs: Vec<mpsc::Sender<String>> = {
            let peers = self.peers.read().await;
            peers
                .get(session_id)
                .map(|entry| entry.values().cloned().collect())
                .unwrap_or_default()
        };

        for tx in txs {
            let _ = tx.send(text.clone()).await;
        }
        Ok(())
    }

    async fn drop_session_entry(&self, session_id: &str) {
        self.peers.write().await.remove(session_id);
        self.locks.lock().remove(session_id);
    }

    fn entry_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Drop lock entries nobody holds. Pair keys outlive their sessions, so
    /// without this the table grows with every distinct caller pair.
    fn compact_locks(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

fn pair_lock_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("pair:{}:{}", a, b)
    } else {
        format!("pair:{}:{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessRole;
    use crate::config::IceProviderConfig;
    use crate::store::MemoryStore;

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            role: AccessRole::User,
        }
    }

    fn registry() -> Arc<SessionRegistry> {
        let store = Arc::new(MemoryStore::new());
        let ice = IceProvider::new(IceProviderConfig::default());
        Arc::new(SessionRegistry::new(
            store.clone(),
            store,
            ice,
            HubConfig::default(),
        ))
    }

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(16)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> ServerFrame {
        let text = rx.recv().await.expect("frame");
        serde_json::from_str(&text).expect("valid server frame")
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_open_pair() {
        let registry = registry();
        let alice = identity("alice");

        let (first, existing) = registry.create_session(&alice, "bob", None).await.unwrap();
        assert!(!existing);

        let (second, existing) = registry.create_session(&alice, "bob", None).await.unwrap();
        assert!(existing);
        assert_eq!(first.id, second.id);

        // The counterpart creating in the reverse order also hits the same one
        let bob = identity("bob");
        let (third, existing) = registry.create_session(&bob, "alice", None).await.unwrap();
        assert!(existing);
        assert_eq!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_join_requires_membership() {
        let registry = registry();
        let alice = identity("alice");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx, _rx) = channel();
        let result = registry.join(&identity("mallory"), &session.id, tx).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));

        let (tx, _rx) = channel();
        let result = registry.join(&alice, "no-such-session", tx).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_first_join_activates_once() {
        let registry = registry();
        let alice = identity("alice");
        let bob = identity("bob");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx_a, _rx_a) = channel();
        let ack = registry.join(&alice, &session.id, tx_a).await.unwrap();
        assert_eq!(ack.session.status, SessionStatus::Active);
        assert_eq!(ack.role, PartyRole::Initiator);
        let started = ack.session.started_at;

        let (tx_b, _rx_b) = channel();
        let ack = registry.join(&bob, &session.id, tx_b).await.unwrap();
        assert_eq!(ack.session.started_at, started);
        assert_eq!(ack.session.participant_count, 2);
        assert_eq!(ack.role, PartyRole::Responder);
    }

    #[tokio::test]
    async fn test_join_notifies_counterpart() {
        let registry = registry();
        let alice = identity("alice");
        let bob = identity("bob");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx_a, mut rx_a) = channel();
        registry.join(&alice, &session.id, tx_a).await.unwrap();

        let (tx_b, _rx_b) = channel();
        registry.join(&bob, &session.id, tx_b).await.unwrap();

        match next_frame(&mut rx_a).await {
            ServerFrame::PeerJoined { user_id, role } => {
                assert_eq!(user_id, "bob");
                assert_eq!(role, PartyRole::Responder);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_persists_before_forwarding() {
        let registry = registry();
        let alice = identity("alice");
        let bob = identity("bob");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx_a, _rx_a) = channel();
        registry.join(&alice, &session.id, tx_a).await.unwrap();
        let (tx_b, mut rx_b) = channel();
        registry.join(&bob, &session.id, tx_b).await.unwrap();

        registry
            .relay(
                &alice,
                &session.id,
                ClientFrame::Offer {
                    sdp: "v=0 offer".to_string(),
                },
            )
            .await
            .unwrap();

        // bob got PeerJoined is not expected (he joined second); first frame
        // must be the relayed offer
        match next_frame(&mut rx_b).await {
            ServerFrame::Offer { sender, sdp } => {
                assert_eq!(sender, "alice");
                assert_eq!(sdp, "v=0 offer");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_to_offline_counterpart_is_persisted_only() {
        let registry = registry();
        let alice = identity("alice");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx_a, _rx_a) = channel();
        registry.join(&alice, &session.id, tx_a).await.unwrap();

        // bob never joined; relay still succeeds
        registry
            .relay(
                &alice,
                &session.id,
                ClientFrame::Offer {
                    sdp: "v=0".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_requires_join() {
        let registry = registry();
        let alice = identity("alice");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let result = registry
            .relay(
                &alice,
                &session.id,
                ClientFrame::Offer {
                    sdp: "v=0".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_end_computes_duration_and_rejects_double_end() {
        let registry = registry();
        let alice = identity("alice");
        let bob = identity("bob");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx_a, _rx_a) = channel();
        registry.join(&alice, &session.id, tx_a).await.unwrap();

        let ended = registry.end_session(&bob, &session.id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.duration_secs.is_some());

        let result = registry.end_session(&alice, &session.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_join_after_end_fails() {
        let registry = registry();
        let alice = identity("alice");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
        registry.end_session(&alice, &session.id).await.unwrap();

        let (tx, _rx) = channel();
        let result = registry.join(&alice, &session.id, tx).await;
        assert!(matches!(result, Err(Error::SessionEnded(_))));
    }

    #[tokio::test]
    async fn test_chat_body_length_enforced() {
        let config = HubConfig {
            max_chat_body_chars: 5,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let ice = IceProvider::new(IceProviderConfig::default());
        let registry = Arc::new(SessionRegistry::new(store.clone(), store, ice, config));

        let alice = identity("alice");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
        let (tx, _rx) = channel();
        registry.join(&alice, &session.id, tx).await.unwrap();

        let result = registry
            .relay(
                &alice,
                &session.id,
                ClientFrame::Chat {
                    message_id: "m1".to_string(),
                    body: "too long body".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Negotiation(_))));
    }

    #[tokio::test]
    async fn test_create_rate_limit() {
        let config = HubConfig {
            create_limit_per_window: 2,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let ice = IceProvider::new(IceProviderConfig::default());
        let registry = Arc::new(SessionRegistry::new(store.clone(), store, ice, config));

        let alice = identity("alice");
        registry.create_session(&alice, "bob", None).await.unwrap();
        registry.create_session(&alice, "carol", None).await.unwrap();

        let result = registry.create_session(&alice, "dave", None).await;
        assert!(matches!(result, Err(Error::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_reap_ends_stale_sessions() {
        let config = HubConfig {
            session_idle_secs: 0,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let ice = IceProvider::new(IceProviderConfig::default());
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            store.clone(),
            ice,
            config,
        ));

        let alice = identity("alice");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let reaped = registry.reap_idle().await.unwrap();
        assert_eq!(reaped, 1);

        let ended = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.duration_secs, Some(0));
    }

    #[tokio::test]
    async fn test_leave_notifies_counterpart_without_ending() {
        let registry = registry();
        let alice = identity("alice");
        let bob = identity("bob");
        let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

        let (tx_a, mut rx_a) = channel();
        registry.join(&alice, &session.id, tx_a).await.unwrap();
        let (tx_b, _rx_b) = channel();
        registry.join(&bob, &session.id, tx_b).await.unwrap();
        let _ = next_frame(&mut rx_a).await; // PeerJoined

        registry.leave(&bob, &session.id).await.unwrap();

        match next_frame(&mut rx_a).await {
            ServerFrame::PeerLeft { user_id } => assert_eq!(user_id, "bob"),
            other => panic!("unexpected frame: {:?}", other),
        }

        let still_open = registry.load(&session.id).await.unwrap();
        assert_eq!(still_open.status, SessionStatus::Active);
        assert_eq!(still_open.participant_count, 1);
    }

    #[tokio::test]
    async fn test_lock_table_compacts_to_empty_when_idle() {
        let registry = registry();

        // Each distinct pair leaves a pair key behind, each session an id key
        for i in 0..8 {
            let caller = identity(&format!("caller-{}", i));
            let (session, _) = registry
                .create_session(&caller, &format!("callee-{}", i), None)
                .await
                .unwrap();
            registry.end_session(&caller, &session.id).await.unwrap();
        }
        assert!(!registry.locks.lock().is_empty());

        registry.compact_locks();
        assert!(registry.locks.lock().is_empty());
    }
}
