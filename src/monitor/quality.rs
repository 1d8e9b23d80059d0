//! Link quality sampling, banding, and media level adaptation

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One transport statistics snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualitySample {
    /// Available outgoing bitrate
    pub bitrate_kbps: f64,
    /// Round-trip time
    pub rtt_ms: f64,
    /// Packet loss, percent (0..=100)
    pub packet_loss_pct: f64,
    /// Inter-arrival jitter
    pub jitter_ms: f64,
    /// Sample time
    pub at: DateTime<Utc>,
}

/// Where samples come from; the negotiation engine implements this over the
/// peer connection's stats report, tests fake it
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Pull one sample; `None` when no nominated candidate pair exists yet
    async fn sample(&self) -> Result<Option<QualitySample>>;
}

/// Perceived call quality, classified from trailing averages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Media level preset; independent of the observed band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
}

impl QualityLevel {
    /// All presets, ascending
    pub const ALL: [QualityLevel; 3] = [QualityLevel::Low, QualityLevel::Medium, QualityLevel::High];

    /// Preset at the given index, if in range
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(QualityLevel::Low),
            1 => Some(QualityLevel::Medium),
            2 => Some(QualityLevel::High),
            _ => None,
        }
    }

    /// Index of this preset
    pub fn index(self) -> usize {
        match self {
            QualityLevel::Low => 0,
            QualityLevel::Medium => 1,
            QualityLevel::High => 2,
        }
    }

    fn step_down(self) -> Option<Self> {
        Self::from_index(self.index() as i64 - 1)
    }

    fn step_up(self) -> Option<Self> {
        Self::from_index(self.index() as i64 + 1)
    }
}

/// Band and adaptation thresholds
#[derive(Debug, Clone)]
pub struct QualityThresholds {
    /// Loss/RTT ceilings for the Excellent band
    pub excellent_loss_pct: f64,
    pub excellent_rtt_ms: f64,
    /// Ceilings for the Good band
    pub good_loss_pct: f64,
    pub good_rtt_ms: f64,
    /// Ceilings for the Fair band; beyond these is Poor
    pub fair_loss_pct: f64,
    pub fair_rtt_ms: f64,
    /// Average bitrate below this steps the level down regardless of band
    pub low_bitrate_kbps: f64,
    /// Average bitrate required before a step up is allowed
    pub high_bitrate_kbps: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_loss_pct: 1.0,
            excellent_rtt_ms: 100.0,
            good_loss_pct: 3.0,
            good_rtt_ms: 250.0,
            fair_loss_pct: 8.0,
            fair_rtt_ms: 500.0,
            low_bitrate_kbps: 300.0,
            high_bitrate_kbps: 1500.0,
        }
    }
}

/// Trailing averages over the sample window
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityAverages {
    pub bitrate_kbps: f64,
    pub rtt_ms: f64,
    pub packet_loss_pct: f64,
    pub jitter_ms: f64,
}

type LevelObserver = Arc<dyn Fn(QualityLevel) + Send + Sync>;

/// Samples link statistics into a bounded ring buffer, classifies a quality
/// band, and (when adaptation is enabled) requests media level changes
///
/// An empty buffer classifies `Fair`: the middle band, so a call neither
/// starts degraded nor flaps up from a false Excellent.
pub struct QualityMonitor {
    thresholds: QualityThresholds,
    capacity: usize,
    samples: RwLock<VecDeque<QualitySample>>,
    level: RwLock<QualityLevel>,
    adaptation_enabled: AtomicBool,
    observer: Mutex<Option<LevelObserver>>,
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityMonitor {
    /// Monitor with default thresholds and a 30-sample window
    pub fn new() -> Self {
        Self::with_thresholds(QualityThresholds::default(), 30)
    }

    /// Monitor with explicit thresholds and buffer capacity
    pub fn with_thresholds(thresholds: QualityThresholds, capacity: usize) -> Self {
        Self {
            thresholds,
            capacity: capacity.max(1),
            samples: RwLock::new(VecDeque::new()),
            level: RwLock::new(QualityLevel::High),
            adaptation_enabled: AtomicBool::new(true),
            observer: Mutex::new(None),
        }
    }

    /// Register the level-change observer. At most one handler; registering
    /// again replaces the previous one.
    pub fn on_level_change(&self, handler: impl Fn(QualityLevel) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Arc::new(handler));
    }

    /// Push one sample; may trigger an adaptation request
    pub fn record_sample(&self, sample: QualitySample) {
        {
            let mut samples = self.samples.write();
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
        }

        if self.adaptation_enabled.load(Ordering::Relaxed) {
            self.adapt();
        }
    }

    /// Mean over the trailing `window` samples, `None` when empty
    pub fn average_metrics(&self, window: usize) -> Option<QualityAverages> {
        let samples = self.samples.read();
        if samples.is_empty() || window == 0 {
            return None;
        }

        let skip = samples.len().saturating_sub(window);
        let tail: Vec<&QualitySample> = samples.iter().skip(skip).collect();
        let n = tail.len() as f64;

        Some(QualityAverages {
            bitrate_kbps: tail.iter().map(|s| s.bitrate_kbps).sum::<f64>() / n,
            rtt_ms: tail.iter().map(|s| s.rtt_ms).sum::<f64>() / n,
            packet_loss_pct: tail.iter().map(|s| s.packet_loss_pct).sum::<f64>() / n,
            jitter_ms: tail.iter().map(|s| s.jitter_ms).sum::<f64>() / n,
        })
    }

    /// Band over the whole buffer; `Fair` when no samples exist
    pub fn classify(&self) -> QualityBand {
        let Some(avg) = self.average_metrics(self.capacity) else {
            return QualityBand::Fair;
        };

        let t = &self.thresholds;
        if avg.packet_loss_pct < t.excellent_loss_pct && avg.rtt_ms < t.excellent_rtt_ms {
            QualityBand::Excellent
        } else if avg.packet_loss_pct < t.good_loss_pct && avg.rtt_ms < t.good_rtt_ms {
            QualityBand::Good
        } else if avg.packet_loss_pct < t.fair_loss_pct && avg.rtt_ms < t.fair_rtt_ms {
            QualityBand::Fair
        } else {
            QualityBand::Poor
        }
    }

    /// Current media level preset
    pub fn level(&self) -> QualityLevel {
        *self.level.read()
    }

    /// Manually select a preset by index
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an out-of-range index; the current level
    /// is left untouched.
    pub fn set_level(&self, index: i64) -> Result<()> {
        let level = QualityLevel::from_index(index).ok_or_else(|| {
            Error::InvalidConfig(format!("quality level index {} out of range 0..=2", index))
        })?;

        self.apply_level(level);
        Ok(())
    }

    /// Gate automatic level-change requests; sampling continues either way
    pub fn set_adaptation_enabled(&self, enabled: bool) {
        self.adaptation_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether automatic adaptation is active
    pub fn adaptation_enabled(&self) -> bool {
        self.adaptation_enabled.load(Ordering::Relaxed)
    }

    /// Number of buffered samples
    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }

    /// Pull one sample from the source and record it
    pub async fn poll(&self, source: &dyn StatsSource) -> Result<()> {
        if let Some(sample) = source.sample().await? {
            debug!(
                bitrate_kbps = sample.bitrate_kbps,
                rtt_ms = sample.rtt_ms,
                loss_pct = sample.packet_loss_pct,
                "quality sample"
            );
            self.record_sample(sample);
        }
        Ok(())
    }

    /// Background sampling loop on the given interval
    pub fn spawn_sampler(
        self: &Arc<Self>,
        source: Arc<dyn StatsSource>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.poll(source.as_ref()).await {
                    debug!("stats sample failed: {}", e);
                }
            }
        })
    }

    fn adapt(&self) {
        // Bitrate 0.0 means the transport reported no estimate; treat it as
        // unknown rather than starvation
        let bitrate = self
            .average_metrics(self.capacity)
            .map(|avg| avg.bitrate_kbps)
            .filter(|kbps| *kbps > 0.0);
        let starved = bitrate
            .map(|kbps| kbps < self.thresholds.low_bitrate_kbps)
            .unwrap_or(false);
        let headroom = bitrate
            .map(|kbps| kbps >= self.thresholds.high_bitrate_kbps)
            .unwrap_or(true);

        let requested = match self.classify() {
            QualityBand::Poor => self.level().step_down(),
            _ if starved => self.level().step_down(),
            QualityBand::Excellent if headroom => self.level().step_up(),
            _ => None,
        };

        if let Some(level) = requested {
            info!(?level, "adaptive media level change");
            self.apply_level(level);
        }
    }

    fn apply_level(&self, level: QualityLevel) {
        {
            let mut current = self.level.write();
            if *current == level {
                return;
            }
            *current = level;
        }

        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(level);
        }
    }
}
