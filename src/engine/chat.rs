//! Reliable text side-channel plumbing
//!
//! Chat travels over the data channel when it is open and over the signaling
//! link otherwise; the receiving side deduplicates by message id because a
//! message re-sent across a path switch can arrive on both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Which path carries a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPath {
    /// Peer-to-peer over the open data channel
    DataChannel,
    /// Through the hub's signaling relay
    Relayed,
}

impl ChatPath {
    /// Data channel when open, relay otherwise; never both
    pub fn select(channel_open: bool) -> Self {
        if channel_open {
            ChatPath::DataChannel
        } else {
            ChatPath::Relayed
        }
    }
}

/// Chat message as framed on the data channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelChat {
    /// Dedupe key, shared with the relayed representation
    pub id: String,
    pub sender: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl ChannelChat {
    pub fn new(sender: String, body: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            body,
            sent_at: Utc::now(),
        }
    }
}

/// Bounded seen-set keyed by message id
pub struct ChatDeduper {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl ChatDeduper {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// True the first time an id is seen, false on every repeat
    pub fn accept(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }

        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}
