//! Signaling hub
//!
//! Central rendezvous for two-party calls: session lifecycle, authenticated
//! relay of offers/answers/candidates/chat, idle reaping, and rate limiting.
//! The hub never inspects SDP or candidate payloads; it persists and forwards.

mod connection;
mod metrics;
mod protocol;
mod rate_limit;
mod registry;

pub use connection::HubServer;
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use protocol::{ClientFrame, ErrorCode, ServerFrame};
pub use rate_limit::RateLimiter;
pub use registry::{JoinAck, SessionRegistry};
