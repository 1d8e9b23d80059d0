//! Fault classification and system health verdict

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Where a fault originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Peer connection failed or dropped
    Connection,
    /// Offer/answer/candidate exchange broke down
    Negotiation,
    /// Local capture denied or device missing
    MediaAccess,
    /// Reliable text side-channel failure
    SideChannel,
    /// Token rejected or expired mid-call
    Authentication,
    /// Server probe or credential rotation failure
    Network,
}

/// Fixed severity ranking per fault kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl FaultKind {
    /// Severity is a property of the kind, not of the individual event
    pub fn severity(self) -> Severity {
        match self {
            FaultKind::Authentication => Severity::Critical,
            FaultKind::Connection | FaultKind::MediaAccess => Severity::High,
            FaultKind::Negotiation | FaultKind::Network => Severity::Medium,
            FaultKind::SideChannel => Severity::Low,
        }
    }
}

/// One classified fault event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Fault origin
    pub kind: FaultKind,
    /// Derived severity
    pub severity: Severity,
    /// Human-readable detail
    pub detail: String,
    /// When the fault was recorded
    pub at: DateTime<Utc>,
}

/// Classifier tuning
#[derive(Debug, Clone)]
pub struct FaultPolicy {
    /// Maximum retained fault records
    pub history_capacity: usize,
    /// Window the health verdict looks back over
    pub health_window: Duration,
    /// High-severity faults tolerated inside the window before the verdict
    /// flips unhealthy
    pub high_fault_threshold: usize,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            history_capacity: 256,
            health_window: Duration::minutes(5),
            high_fault_threshold: 3,
        }
    }
}

type FaultObserver = Arc<dyn Fn(&FaultRecord) + Send + Sync>;

/// Collects runtime faults and answers "is the system healthy right now"
///
/// The health verdict only considers faults inside the policy window, so an
/// old storm of failures ages out without an explicit `clear`.
pub struct FaultClassifier {
    policy: FaultPolicy,
    history: RwLock<VecDeque<FaultRecord>>,
    observer: Mutex<Option<FaultObserver>>,
}

impl Default for FaultClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultClassifier {
    /// Classifier with default policy
    pub fn new() -> Self {
        Self::with_policy(FaultPolicy::default())
    }

    /// Classifier with explicit policy
    pub fn with_policy(policy: FaultPolicy) -> Self {
        Self {
            policy,
            history: RwLock::new(VecDeque::new()),
            observer: Mutex::new(None),
        }
    }

    /// Register the fault observer. At most one handler; registering again
    /// replaces the previous one.
    pub fn on_fault(&self, handler: impl Fn(&FaultRecord) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Arc::new(handler));
    }

    /// Record a fault, classify it, and notify the observer
    pub fn record(&self, kind: FaultKind, detail: String) {
        self.record_at(kind, detail, Utc::now());
    }

    fn record_at(&self, kind: FaultKind, detail: String, at: DateTime<Utc>) {
        let record = FaultRecord {
            kind,
            severity: kind.severity(),
            detail,
            at,
        };

        warn!(
            kind = ?record.kind,
            severity = ?record.severity,
            detail = %record.detail,
            "fault recorded"
        );

        {
            let mut history = self.history.write();
            if history.len() == self.policy.history_capacity {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(&record);
        }
    }

    /// Health verdict over the trailing window: unhealthy on any Critical
    /// fault, or on more than `high_fault_threshold` High faults
    pub fn is_system_healthy(&self) -> bool {
        let cutoff = Utc::now() - self.policy.health_window;
        let history = self.history.read();

        let mut high = 0usize;
        for record in history.iter().filter(|r| r.at >= cutoff) {
            match record.severity {
                Severity::Critical => return false,
                Severity::High => high += 1,
                _ => {}
            }
        }

        high <= self.policy.high_fault_threshold
    }

    /// Number of retained records of the given kind
    pub fn count(&self, kind: FaultKind) -> usize {
        self.history.read().iter().filter(|r| r.kind == kind).count()
    }

    /// Total retained records
    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    /// Recent records, newest last
    pub fn recent(&self, limit: usize) -> Vec<FaultRecord> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Drop all history; the health verdict reflects the emptied history
    pub fn clear(&self) {
        self.history.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_severity_mapping() {
        assert_eq!(FaultKind::Authentication.severity(), Severity::Critical);
        assert_eq!(FaultKind::Connection.severity(), Severity::High);
        assert_eq!(FaultKind::MediaAccess.severity(), Severity::High);
        assert_eq!(FaultKind::Negotiation.severity(), Severity::Medium);
        assert_eq!(FaultKind::Network.severity(), Severity::Medium);
        assert_eq!(FaultKind::SideChannel.severity(), Severity::Low);
    }

    #[test]
    fn test_critical_fault_flips_health() {
        let classifier = FaultClassifier::new();
        assert!(classifier.is_system_healthy());

        classifier.record(FaultKind::Authentication, "token expired mid-call".to_string());
        assert!(!classifier.is_system_healthy());

        classifier.clear();
        assert!(classifier.is_system_healthy());
    }

    #[test]
    fn test_high_faults_within_threshold_stay_healthy() {
        let classifier = FaultClassifier::with_policy(FaultPolicy {
            high_fault_threshold: 2,
            ..Default::default()
        });

        classifier.record(FaultKind::Connection, "drop 1".to_string());
        classifier.record(FaultKind::Connection, "drop 2".to_string());
        assert!(classifier.is_system_healthy());

        classifier.record(FaultKind::MediaAccess, "camera denied".to_string());
        assert!(!classifier.is_system_healthy());
    }

    #[test]
    fn test_faults_outside_window_ignored() {
        let classifier = FaultClassifier::new();
        classifier.record_at(
            FaultKind::Authentication,
            "ancient".to_string(),
            Utc::now() - Duration::hours(1),
        );

        assert!(classifier.is_system_healthy());
        // Still counted in history, only the verdict windows it out
        assert_eq!(classifier.count(FaultKind::Authentication), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let classifier = FaultClassifier::with_policy(FaultPolicy {
            history_capacity: 3,
            ..Default::default()
        });

        for i in 0..5 {
            classifier.record(FaultKind::SideChannel, format!("fault {}", i));
        }

        assert_eq!(classifier.len(), 3);
        let recent = classifier.recent(10);
        assert_eq!(recent[0].detail, "fault 2");
        assert_eq!(recent[2].detail, "fault 4");
    }

    #[test]
    fn test_observer_invoked_per_record() {
        let classifier = FaultClassifier::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        classifier.on_fault(move |record| {
            assert_eq!(record.kind, FaultKind::Network);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        classifier.record(FaultKind::Network, "probe timeout".to_string());
        classifier.record(FaultKind::Network, "probe timeout".to_string());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
