//! Session, negotiation-record, and chat-message types

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the call a party is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    /// The caller: creates the session and produces the offer
    Initiator,
    /// The callee: joins the session and produces the answer
    Responder,
}

/// Session lifecycle status; transitions are monotonic
/// (`Created → Active → Ended`, no reactivation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no party has joined yet
    Created,
    /// At least one party joined
    Active,
    /// Terminated; never leaves this state
    Ended,
}

/// One logical call between two identified parties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique id
    pub id: String,

    /// Party that requested the session
    pub initiator: String,

    /// The counterpart party
    pub responder: String,

    /// Optional external linkage id (e.g. a booking record)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkage_id: Option<String>,

    /// Lifecycle status
    pub status: SessionStatus,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// First-join time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// End time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Whole-second call duration, computed at end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,

    /// Number of parties currently joined (0..=2)
    pub participant_count: u8,
}

impl Session {
    /// Create a new session in `Created` status
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the two parties are not distinct.
    pub fn new(initiator: String, responder: String, linkage_id: Option<String>) -> Result<Self> {
        if initiator == responder {
            return Err(Error::Conflict(
                "a session requires two distinct parties".to_string(),
            ));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            initiator,
            responder,
            linkage_id,
            status: SessionStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            duration_secs: None,
            participant_count: 0,
        })
    }

    /// Whether the given user id is one of the two parties
    pub fn is_party(&self, user_id: &str) -> bool {
        self.initiator == user_id || self.responder == user_id
    }

    /// Role of the given party, if they are one
    pub fn role_of(&self, user_id: &str) -> Option<PartyRole> {
        if self.initiator == user_id {
            Some(PartyRole::Initiator)
        } else if self.responder == user_id {
            Some(PartyRole::Responder)
        } else {
            None
        }
    }

    /// The other party's id, if the given user is a party
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.initiator == user_id {
            Some(&self.responder)
        } else if self.responder == user_id {
            Some(&self.initiator)
        } else {
            None
        }
    }

    /// Flip `Created → Active`, recording the start time. Only the first
    /// join transitions; later joins leave the status untouched. Returns
    /// whether the transition happened.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Created {
            self.status = SessionStatus::Active;
            self.started_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Terminate the session, recording end time and whole-second duration.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the session already ended (double-end is
    /// surfaced, not swallowed).
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == SessionStatus::Ended {
            return Err(Error::Conflict(format!("session {} already ended", self.id)));
        }

        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        // A session ended without ever activating records duration 0.
        self.duration_secs = Some(match self.started_at {
            Some(started) => (now - started).num_seconds().max(0),
            None => 0,
        });
        Ok(())
    }
}

/// Kind of an audited negotiation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationKind {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// Network-path candidate
    IceCandidate,
    /// Party joined the session
    Join,
    /// Party left or was reaped
    Leave,
}

/// Write-once audit record of a relayed negotiation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRecord {
    /// Session this record belongs to
    pub session_id: String,

    /// Sending party
    pub sender: String,

    /// Message kind
    pub kind: NegotiationKind,

    /// Opaque payload (SDP text, candidate line, or empty for join/leave)
    pub payload: String,

    /// When the hub accepted the message
    pub recorded_at: DateTime<Utc>,

    /// Optional connection metadata (remote address, user agent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_meta: Option<String>,
}

impl NegotiationRecord {
    /// Build a record timestamped now
    pub fn new(session_id: &str, sender: &str, kind: NegotiationKind, payload: String) -> Self {
        Self {
            session_id: session_id.to_string(),
            sender: sender.to_string(),
            kind,
            payload,
            recorded_at: Utc::now(),
            connection_meta: None,
        }
    }

    /// Attach connection metadata
    pub fn with_meta(mut self, meta: String) -> Self {
        self.connection_meta = Some(meta);
        self
    }
}

/// Chat message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// User-authored text
    Text,
    /// System notice (e.g. reaper-generated)
    System,
}

/// An immutable chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message id (also the dedupe key on the receiving side)
    pub id: String,

    /// Session this message belongs to
    pub session_id: String,

    /// Sending party
    pub sender: String,

    /// Sender's role in the session
    pub sender_role: PartyRole,

    /// Message body (bounded length, enforced at the hub boundary)
    pub body: String,

    /// Message kind
    pub kind: ChatKind,

    /// When the message was accepted
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> Session {
        Session::new("dr-house".to_string(), "pat-7".to_string(), None).unwrap()
    }

    #[test]
    fn test_new_session_is_created() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Created);
        assert!(s.started_at.is_none());
        assert_eq!(s.participant_count, 0);
    }

    #[test]
    fn test_identical_parties_rejected() {
        let result = Session::new("same".to_string(), "same".to_string(), None);
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_activate_transitions_once() {
        let mut s = session();
        let now = Utc::now();

        assert!(s.activate(now));
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.started_at, Some(now));

        // Second join must not re-transition or move started_at
        assert!(!s.activate(now + Duration::seconds(5)));
        assert_eq!(s.started_at, Some(now));
    }

    #[test]
    fn test_end_computes_whole_second_duration() {
        let mut s = session();
        let start = Utc::now();
        s.activate(start);
        s.end(start + Duration::seconds(61)).unwrap();

        assert_eq!(s.status, SessionStatus::Ended);
        assert_eq!(s.duration_secs, Some(61));
    }

    #[test]
    fn test_double_end_is_conflict() {
        let mut s = session();
        let now = Utc::now();
        s.activate(now);
        s.end(now).unwrap();

        assert!(matches!(s.end(now), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_end_without_activation_has_zero_duration() {
        let mut s = session();
        s.end(Utc::now()).unwrap();
        assert_eq!(s.duration_secs, Some(0));
    }

    #[test]
    fn test_party_helpers() {
        let s = session();
        assert!(s.is_party("dr-house"));
        assert!(!s.is_party("stranger"));
        assert_eq!(s.role_of("pat-7"), Some(PartyRole::Responder));
        assert_eq!(s.counterpart_of("dr-house"), Some("pat-7"));
        assert_eq!(s.counterpart_of("stranger"), None);
    }
}
