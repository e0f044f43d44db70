//! Fault detection
//!
//! - `DetectionRule` - threshold rule with sustained-duration debounce
//! - `AnomalyDetector` / `ZScoreDetector` - rolling-baseline outlier scoring
//! - `FaultDetector` - evaluates both and emits DETECTED faults

pub mod anomaly;
pub mod detector;
pub mod rule;

pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalySignal, ZScoreDetector};
pub use detector::{DetectionRecord, FaultDetector};
pub use rule::{Comparator, DetectionRule};
