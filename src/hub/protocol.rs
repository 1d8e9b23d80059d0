//! Signaling wire protocol
//!
//! Closed tagged enums on both directions; adding a message kind is a
//! compile-time change for every match site.

use crate::ice::IceServerDescriptor;
use crate::store::{ChatMessage, PartyRole, Session};
use crate::Error;
use serde::{Deserialize, Serialize};

/// Frames a client sends to the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection
    Auth { token: String },
    /// Request a session with a counterpart
    CreateSession {
        counterpart: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        linkage_id: Option<String>,
    },
    /// Enter a session as one of its parties
    JoinSession { session_id: String },
    /// SDP offer for the counterpart
    Offer { sdp: String },
    /// SDP answer for the counterpart
    Answer { sdp: String },
    /// Network-path candidate for the counterpart
    IceCandidate {
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mline_index: Option<u16>,
    },
    /// Relayed chat message; the id doubles as the receiver's dedupe key
    Chat { message_id: String, body: String },
    /// Terminate the joined session
    EndSession,
    /// Leave the joined session without ending it
    Leave,
}

/// Frames the hub sends to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Auth accepted
    AuthOk { user_id: String },
    /// Session created (or the already-open one for this pair)
    SessionCreated { session: Session, existing: bool },
    /// Join accepted; carries everything needed to start negotiating
    Joined {
        session: Session,
        role: PartyRole,
        ice_servers: Vec<IceServerDescriptor>,
    },
    /// The counterpart joined
    PeerJoined { user_id: String, role: PartyRole },
    /// The counterpart left (connection closed or explicit leave)
    PeerLeft { user_id: String },
    /// Relayed offer
    Offer { sender: String, sdp: String },
    /// Relayed answer
    Answer { sender: String, sdp: String },
    /// Relayed candidate
    IceCandidate {
        sender: String,
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mline_index: Option<u16>,
    },
    /// Relayed chat message, already persisted
    Chat { message: ChatMessage },
    /// Session terminated (by a party or the reaper)
    SessionEnded {
        session_id: String,
        ended_by: String,
        duration_secs: i64,
    },
    /// Classified failure; the connection may stay open unless the code is
    /// `unauthenticated`
    Error { code: ErrorCode, message: String },
}

/// Wire error codes, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Forbidden,
    Conflict,
    Ended,
    Unauthenticated,
    RateLimited,
    Invalid,
    Internal,
}

impl ServerFrame {
    /// Classify an error into its wire frame
    pub fn from_error(err: &Error) -> Self {
        let (code, message) = match err {
            Error::NotFound(m) => (ErrorCode::NotFound, m.clone()),
            Error::Forbidden(m) => (ErrorCode::Forbidden, m.clone()),
            Error::Conflict(m) => (ErrorCode::Conflict, m.clone()),
            Error::SessionEnded(m) => (ErrorCode::Ended, m.clone()),
            Error::Authentication(m) => (ErrorCode::Unauthenticated, m.clone()),
            Error::RateLimited(m) => (ErrorCode::RateLimited, m.clone()),
            Error::Negotiation(m) | Error::InvalidConfig(m) => (ErrorCode::Invalid, m.clone()),
            Error::Serialization(e) => (ErrorCode::Invalid, e.to_string()),
            other => (ErrorCode::Internal, other.to_string()),
        };
        ServerFrame::Error { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_wire_shape() {
        let frame = ClientFrame::Auth {
            token: "tok".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"auth","token":"tok"}"#);

        let parsed: ClientFrame =
            serde_json::from_str(r#"{"type":"join_session","session_id":"s1"}"#).unwrap();
        assert!(matches!(parsed, ClientFrame::JoinSession { session_id } if session_id == "s1"));
    }

    #[test]
    fn test_candidate_frame_optional_fields() {
        let parsed: ClientFrame =
            serde_json::from_str(r#"{"type":"ice_candidate","candidate":"candidate:1 1 udp"}"#)
                .unwrap();
        match parsed {
            ClientFrame::IceCandidate {
                sdp_mid,
                sdp_mline_index,
                ..
            } => {
                assert!(sdp_mid.is_none());
                assert!(sdp_mline_index.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type":"shutdown_everything"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_classification() {
        let frame = ServerFrame::from_error(&Error::SessionEnded("s1".to_string()));
        assert!(matches!(
            frame,
            ServerFrame::Error {
                code: ErrorCode::Ended,
                ..
            }
        ));

        let frame = ServerFrame::from_error(&Error::Storage("disk".to_string()));
        assert!(matches!(
            frame,
            ServerFrame::Error {
                code: ErrorCode::Internal,
                ..
            }
        ));
    }
}
