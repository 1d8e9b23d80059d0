//! Configuration types for the telecall core

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the signaling hub process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// WebSocket bind address for the signaling hub
    pub hub_bind_addr: String,

    /// HTTP bind address for the REST read surface
    pub api_bind_addr: String,

    /// ICE descriptor provider settings
    pub ice: IceProviderConfig,

    /// Hub session/relay settings
    pub hub: HubConfig,
}

/// Credential/ICE provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceProviderConfig {
    /// Reflection (STUN) server URLs
    pub stun_urls: Vec<String>,

    /// Relay (TURN) server URLs; credentials are generated, not configured
    pub turn_urls: Vec<String>,

    /// Shared secret the relay infrastructure verifies credentials against
    pub shared_secret: String,

    /// Static account tag embedded in generated usernames
    pub account_tag: String,

    /// Relay credential lifetime (default: 24h)
    pub credential_ttl_secs: u64,

    /// Credential rotation interval (default: 24h)
    pub rotation_interval_secs: u64,

    /// Health-check probe interval (default: 5 min)
    pub health_check_interval_secs: u64,

    /// Per-probe timeout
    pub probe_timeout_ms: u64,

    /// Cap on reflection servers handed to a joining client
    pub max_stun_servers: usize,
}

/// Signaling hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Age threshold after which created/active sessions are reaped
    pub session_idle_secs: u64,

    /// Reaper sweep interval
    pub reap_interval_secs: u64,

    /// Negotiation-record retention window (default: 30 days)
    pub record_retention_secs: u64,

    /// Maximum chat message body length in characters
    pub max_chat_body_chars: usize,

    /// Session creations allowed per identity per rate window
    pub create_limit_per_window: u32,

    /// Relay frames allowed per identity per rate window
    pub relay_limit_per_window: u32,

    /// Rate-limit window length
    pub rate_window_secs: u64,
}

/// Client signaling-link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Connect/join handshake timeout
    pub connect_timeout_ms: u64,

    /// Base reconnect backoff; doubles per attempt
    pub reconnect_base_ms: u64,

    /// Backoff cap
    pub reconnect_max_ms: u64,

    /// Reconnect attempts before the link gives up
    pub max_reconnect_attempts: u32,

    /// Heartbeat ping interval
    pub heartbeat_interval_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            hub_bind_addr: "0.0.0.0:8443".to_string(),
            api_bind_addr: "0.0.0.0:8080".to_string(),
            ice: IceProviderConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

impl Default for IceProviderConfig {
    fn default() -> Self {
        Self {
            stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_urls: Vec::new(),
            shared_secret: String::new(),
            account_tag: "telecall".to_string(),
            credential_ttl_secs: 24 * 3600,
            rotation_interval_secs: 24 * 3600,
            health_check_interval_secs: 300,
            probe_timeout_ms: 3000,
            max_stun_servers: 4,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_idle_secs: 4 * 3600,
            reap_interval_secs: 300,
            record_retention_secs: 30 * 24 * 3600,
            max_chat_body_chars: 1000,
            create_limit_per_window: 10,
            relay_limit_per_window: 600,
            rate_window_secs: 60,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 15_000,
            max_reconnect_attempts: 6,
            heartbeat_interval_ms: 20_000,
        }
    }
}

impl IceProviderConfig {
    /// Credential lifetime as a Duration
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }

    /// Per-probe timeout as a Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl CoreConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `ice.stun_urls` is empty
    /// - relay servers are configured without a shared secret
    /// - `ice.max_stun_servers` is zero
    /// - any rate limit or window is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.ice.stun_urls.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one reflection (STUN) server is required".to_string(),
            ));
        }

        if !self.ice.turn_urls.is_empty() && self.ice.shared_secret.is_empty() {
            return Err(Error::InvalidConfig(
                "relay servers configured but no shared secret set".to_string(),
            ));
        }

        if self.ice.max_stun_servers == 0 {
            return Err(Error::InvalidConfig(
                "max_stun_servers must be at least 1".to_string(),
            ));
        }

        if self.hub.create_limit_per_window == 0 || self.hub.relay_limit_per_window == 0 {
            return Err(Error::InvalidConfig(
                "rate limits must be at least 1 per window".to_string(),
            ));
        }

        if self.hub.rate_window_secs == 0 {
            return Err(Error::InvalidConfig(
                "rate_window_secs must be at least 1".to_string(),
            ));
        }

        if self.hub.max_chat_body_chars == 0 {
            return Err(Error::InvalidConfig(
                "max_chat_body_chars must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
