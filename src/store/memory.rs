//! In-memory store implementation

use super::{ChatMessage, MessageStore, NegotiationRecord, Session, SessionStatus, SessionStore};
use crate::auth::Identity;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory `SessionStore` + `MessageStore`
///
/// Suitable for single-process deployments and tests. Sessions are never
/// removed, matching the "status-terminated, never deleted" rule;
/// negotiation records age out via `sweep_expired`.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    negotiations: RwLock<Vec<NegotiationRecord>>,
    chats: RwLock<Vec<ChatMessage>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(Error::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("session {}", session.id))),
        }
    }

    async fn find_open_for_pair(&self, a: &str, b: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|s| {
                s.status != SessionStatus::Ended
                    && ((s.initiator == a && s.responder == b)
                        || (s.initiator == b && s.responder == a))
            })
            .cloned())
    }

    async fn list_open_older_than(&self, age: Duration) -> Result<Vec<Session>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age)
                .map_err(|e| Error::Storage(format!("invalid reap age: {}", e)))?;

        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.status != SessionStatus::Ended && s.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_negotiation(&self, record: NegotiationRecord) -> Result<()> {
        self.negotiations.write().await.push(record);
        Ok(())
    }

    async fn append_chat(&self, message: ChatMessage) -> Result<()> {
        self.chats.write().await.push(message);
        Ok(())
    }

    async fn chat_history(
        &self,
        session_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>> {
        if page_size == 0 {
            return Err(Error::Storage("page_size must be at least 1".to_string()));
        }

        let chats = self.chats.read().await;
        // Insert order is accept order, so a plain slice is already
        // oldest-first / newest-last.
        Ok(chats
            .iter()
            .filter(|m| m.session_id == session_id)
            .skip(page * page_size)
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn delete_chat(
        &self,
        session_id: &str,
        message_id: &str,
        requester: &Identity,
    ) -> Result<()> {
        let mut chats = self.chats.write().await;

        let idx = chats
            .iter()
            .position(|m| m.session_id == session_id && m.id == message_id)
            .ok_or_else(|| Error::NotFound(format!("chat message {}", message_id)))?;

        if !requester.may_delete_chat_of(&chats[idx].sender) {
            return Err(Error::Forbidden(
                "only the sender or an admin may delete a chat message".to_string(),
            ));
        }

        chats.remove(idx);
        Ok(())
    }

    async fn negotiation_count(&self, session_id: &str) -> Result<usize> {
        let negotiations = self.negotiations.read().await;
        Ok(negotiations
            .iter()
            .filter(|r| r.session_id == session_id)
            .count())
    }

    async fn sweep_expired(&self, retention: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| Error::Storage(format!("invalid retention: {}", e)))?;

        let mut negotiations = self.negotiations.write().await;
        let before = negotiations.len();
        negotiations.retain(|r| r.recorded_at >= cutoff);
        let removed = before - negotiations.len();

        if removed > 0 {
            debug!(removed, "expired negotiation records swept");
        }

        Ok(removed)
    }
}
