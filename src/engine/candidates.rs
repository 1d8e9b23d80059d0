//! Candidate queueing ahead of the remote description

use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Holds remote candidates that arrive before the remote description
///
/// Applying a candidate before `set_remote_description` fails, so early
/// arrivals are queued in receipt order and drained exactly once when the
/// description lands. Candidates arriving after the drain apply directly.
#[derive(Default)]
pub struct CandidateQueue {
    queued: Vec<RTCIceCandidateInit>,
    remote_set: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a candidate if the remote description is not set yet.
    /// Returns the candidate back when it should be applied directly.
    pub fn push(&mut self, candidate: RTCIceCandidateInit) -> Option<RTCIceCandidateInit> {
        if self.remote_set {
            Some(candidate)
        } else {
            self.queued.push(candidate);
            None
        }
    }

    /// Mark the remote description as set and drain the queue in receipt
    /// order
    pub fn mark_remote_set(&mut self) -> Vec<RTCIceCandidateInit> {
        self.remote_set = true;
        std::mem::take(&mut self.queued)
    }

    pub fn is_remote_set(&self) -> bool {
        self.remote_set
    }

    pub fn pending(&self) -> usize {
        self.queued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: format!("candidate:{} 1 udp 2122260223 192.0.2.{} 54400 typ host", n, n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_early_candidates_drain_in_receipt_order() {
        let mut queue = CandidateQueue::new();

        for n in 1..=5 {
            assert!(queue.push(candidate(n)).is_none());
        }
        assert_eq!(queue.pending(), 5);

        let drained = queue.mark_remote_set();
        assert_eq!(drained.len(), 5);
        for (i, c) in drained.iter().enumerate() {
            assert!(c.candidate.starts_with(&format!("candidate:{}", i + 1)));
        }

        // A late candidate applies directly instead of queueing
        let late = queue.push(candidate(6));
        assert!(late.is_some());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut queue = CandidateQueue::new();
        queue.push(candidate(1));

        assert_eq!(queue.mark_remote_set().len(), 1);
        assert!(queue.mark_remote_set().is_empty());
        assert!(queue.is_remote_set());
    }
}
