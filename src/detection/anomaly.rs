//! Statistical anomaly detection.
//!
//! Anomaly detectors score each new observation against a rolling baseline of
//! the same series. They are a second signal source next to threshold rules.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::Severity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Observations kept per series
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Observations required before a series is scored
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_z_threshold")]
    pub z_score_threshold: f64,
    /// Severity of faults raised from anomalies
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_enabled() -> bool {
    true
}
fn default_window_size() -> usize {
    60
}
fn default_min_samples() -> usize {
    10
}
fn default_z_threshold() -> f64 {
    3.0
}
fn default_severity() -> Severity {
    Severity::Medium
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            z_score_threshold: default_z_threshold(),
            severity: default_severity(),
        }
    }
}

/// An observation that deviates from its baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalySignal {
    pub series: String,
    pub value: f64,
    pub score: f64,
    pub baseline_mean: f64,
    pub baseline_std: f64,
}

/// Pluggable outlier scoring.
pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Score `value` against the series baseline, then fold it into the baseline.
    fn observe(&mut self, series: &str, value: f64) -> Option<AnomalySignal>;

    /// Threshold reported alongside detections.
    fn sensitivity(&self) -> f64;
}

/// Rolling z-score over a fixed window.
#[derive(Debug)]
pub struct ZScoreDetector {
    windows: HashMap<String, VecDeque<f64>>,
    window_size: usize,
    min_samples: usize,
    threshold: f64,
}

impl ZScoreDetector {
    pub fn new(window_size: usize, min_samples: usize, threshold: f64) -> Self {
        Self {
            windows: HashMap::new(),
            window_size: window_size.max(2),
            min_samples: min_samples.max(2),
            threshold,
        }
    }

    pub fn from_config(config: &AnomalyConfig) -> Self {
        Self::new(config.window_size, config.min_samples, config.z_score_threshold)
    }

    fn mean_std(window: &VecDeque<f64>) -> (f64, f64) {
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.sqrt())
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn name(&self) -> &str {
        "zscore"
    }

    fn observe(&mut self, series: &str, value: f64) -> Option<AnomalySignal> {
        let window = self.windows.entry(series.to_string()).or_default();

        let mut signal = None;
        if window.len() >= self.min_samples {
            let (mean, std) = Self::mean_std(window);
            // A flat baseline has no scale to measure deviation against
            if std > f64::EPSILON {
                let score = (value - mean).abs() / std;
                if score >= self.threshold {
                    signal = Some(AnomalySignal {
                        series: series.to_string(),
                        value,
                        score,
                        baseline_mean: mean,
                        baseline_std: std,
                    });
                }
            }
        }

        window.push_back(value);
        while window.len() > self.window_size {
            window.pop_front();
        }
        signal
    }

    fn sensitivity(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_signal_before_min_samples() {
        let mut detector = ZScoreDetector::new(10, 5, 3.0);
        for v in [1.0, 2.0, 1.0, 1000.0] {
            assert!(detector.observe("api_server.response_time", v).is_none());
        }
    }

    #[test]
    fn test_outlier_is_flagged() {
        let mut detector = ZScoreDetector::new(20, 5, 3.0);
        for v in [100.0, 102.0, 98.0, 101.0, 99.0, 100.0] {
            assert!(detector.observe("s", v).is_none());
        }
        let signal = detector.observe("s", 500.0).unwrap();
        assert!(signal.score > 3.0);
        assert!((signal.baseline_mean - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_flat_baseline_never_flags() {
        let mut detector = ZScoreDetector::new(20, 3, 3.0);
        for _ in 0..5 {
            detector.observe("flat", 1.0);
        }
        assert!(detector.observe("flat", 50.0).is_none());
    }

    #[test]
    fn test_series_are_independent() {
        let mut detector = ZScoreDetector::new(20, 3, 2.0);
        for v in [1.0, 1.1, 0.9, 1.0] {
            detector.observe("a", v);
        }
        assert!(detector.observe("b", 100.0).is_none());
        assert!(detector.observe("a", 100.0).is_some());
    }
}
