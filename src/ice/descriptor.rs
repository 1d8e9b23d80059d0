//! ICE server descriptor types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Reflection (STUN-class) vs relay (TURN-class) server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// STUN-class: helps peers discover their reflexive address
    Reflection,
    /// TURN-class: relays traffic; carries generated credentials
    Relay,
}

/// Health of a probed server
///
/// `Unchecked` is an explicit state, not an absent cache key: a server that
/// has never been probed is served as healthy (optimistic default) so a cold
/// health cache never blocks a new deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Never probed; treated as healthy
    Unchecked,
    /// Last probe succeeded
    Healthy,
    /// Last probe failed
    Unhealthy,
}

impl HealthState {
    /// Whether this state is served by `healthy_descriptors`
    pub fn is_served(self) -> bool {
        self != HealthState::Unhealthy
    }
}

/// One reflection or relay server handed to a joining client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerDescriptor {
    /// Server URL (stun:/turn: scheme)
    pub url: String,

    /// Kind of server
    pub kind: ServerKind,

    /// Generated username (relay only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Generated credential (relay only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Credential validity end (relay only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IceServerDescriptor {
    /// A static reflection descriptor
    pub fn reflection(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ServerKind::Reflection,
            username: None,
            credential: None,
            expires_at: None,
        }
    }

    /// A relay descriptor with generated credentials
    pub fn relay(
        url: impl Into<String>,
        username: String,
        credential: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            kind: ServerKind::Relay,
            username: Some(username),
            credential: Some(credential),
            expires_at: Some(expires_at),
        }
    }
}

impl From<&IceServerDescriptor> for RTCIceServer {
    fn from(desc: &IceServerDescriptor) -> Self {
        RTCIceServer {
            urls: vec![desc.url.clone()],
            username: desc.username.clone().unwrap_or_default(),
            credential: desc.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchecked_is_served() {
        assert!(HealthState::Unchecked.is_served());
        assert!(HealthState::Healthy.is_served());
        assert!(!HealthState::Unhealthy.is_served());
    }

    #[test]
    fn test_reflection_descriptor_has_no_credentials() {
        let desc = IceServerDescriptor::reflection("stun:stun.example.org:3478");
        assert_eq!(desc.kind, ServerKind::Reflection);
        assert!(desc.username.is_none());

        let rtc: RTCIceServer = (&desc).into();
        assert_eq!(rtc.urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert!(rtc.username.is_empty());
    }

    #[test]
    fn test_relay_descriptor_converts_with_credentials() {
        let desc = IceServerDescriptor::relay(
            "turn:relay.example.org:3478",
            "1700000000:telecall".to_string(),
            "c2VjcmV0".to_string(),
            Utc::now(),
        );

        let rtc: RTCIceServer = (&desc).into();
        assert_eq!(rtc.username, "1700000000:telecall");
        assert_eq!(rtc.credential, "c2VjcmV0");
    }
}
