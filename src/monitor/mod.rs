//! Call health observation
//!
//! Two passive observers: the fault classifier collects and severity-ranks
//! runtime faults for a system health verdict, and the quality monitor
//! samples transport statistics to band call quality and drive media level
//! adaptation. Neither mutates session state.

mod faults;
mod quality;

pub use faults::{FaultClassifier, FaultKind, FaultPolicy, FaultRecord, Severity};
pub use quality::{
    QualityAverages, QualityBand, QualityLevel, QualityMonitor, QualitySample, QualityThresholds,
    StatsSource,
};
