//! Durable session and message records
//!
//! The persistent record collaborator is modeled as two `async_trait` seams,
//! `SessionStore` and `MessageStore`. `MemoryStore` is the shipped
//! implementation; it gives strict read-after-write consistency because every
//! mutation happens under the same lock the next read takes.

mod memory;
mod types;

pub use memory::MemoryStore;
pub use types::{
    ChatKind, ChatMessage, NegotiationKind, NegotiationRecord, PartyRole, Session, SessionStatus,
};

use crate::auth::Identity;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Durable record of call sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session
    async fn insert(&self, session: Session) -> Result<()>;

    /// Fetch a session by id
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Overwrite a session record
    async fn update(&self, session: &Session) -> Result<()>;

    /// Find a created/active session between the two parties, in either
    /// role order
    async fn find_open_for_pair(&self, a: &str, b: &str) -> Result<Option<Session>>;

    /// List created/active sessions older than the given age (reaper input)
    async fn list_open_older_than(&self, age: Duration) -> Result<Vec<Session>>;
}

/// Append-only audit log of negotiation traffic plus the chat archive
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a negotiation audit record (write-once)
    async fn append_negotiation(&self, record: NegotiationRecord) -> Result<()>;

    /// Append a chat message (immutable once created)
    async fn append_chat(&self, message: ChatMessage) -> Result<()>;

    /// Paginated chat history, newest-last within each page; page 0 is the
    /// oldest page
    async fn chat_history(
        &self,
        session_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// Delete a chat message; only the sender or an admin may delete
    async fn delete_chat(
        &self,
        session_id: &str,
        message_id: &str,
        requester: &Identity,
    ) -> Result<()>;

    /// Count negotiation records for a session (audit tooling)
    async fn negotiation_count(&self, session_id: &str) -> Result<usize>;

    /// Drop negotiation records older than the retention window; returns the
    /// number removed
    async fn sweep_expired(&self, retention: Duration) -> Result<usize>;
}
