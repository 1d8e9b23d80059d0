//! Hub counters for the read surface

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic hub counters
#[derive(Debug, Default)]
pub struct HubMetrics {
    sessions_created: AtomicU64,
    sessions_ended: AtomicU64,
    sessions_reaped: AtomicU64,
    joins: AtomicU64,
    frames_relayed: AtomicU64,
    chats_persisted: AtomicU64,
    frames_rejected: AtomicU64,
}

/// Point-in-time counter snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_ended: u64,
    pub sessions_reaped: u64,
    pub joins: u64,
    pub frames_relayed: u64,
    pub chats_persisted: u64,
    pub frames_rejected: u64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_reaped(&self) {
        self.sessions_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relay(&self) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chat(&self) {
        self.chats_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Relaxed snapshot; counters may skew by in-flight increments
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            chats_persisted: self.chats_persisted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = HubMetrics::new();
        metrics.record_session_created();
        metrics.record_relay();
        metrics.record_relay();

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_created, 1);
        assert_eq!(snap.frames_relayed, 2);
        assert_eq!(snap.sessions_reaped, 0);
    }
}
