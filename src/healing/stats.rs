//! Healing metrics: derived rates, never mutated directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::elapsed_between;
use crate::fault::Fault;
use crate::recovery::RecoveryAction;

/// Aggregated view recomputed from the [`HealingLedger`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingMetrics {
    pub total_faults: u64,
    pub active_faults: u64,
    pub resolved_faults: u64,
    pub total_recovery_actions: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub manual_interventions: u64,

    pub resolution_rate: f64,
    pub recovery_success_rate: f64,
    pub automation_rate: f64,

    /// Mean time between fault detections
    pub mtbf_secs: f64,
    /// Mean time from detection to resolution
    pub mttr_secs: f64,
    /// Breach onset to detection
    pub avg_detection_secs: f64,
    pub avg_diagnosis_secs: f64,
    /// Recovery start to resolution
    pub avg_recovery_secs: f64,
    pub avg_resolution_secs: f64,

    pub uptime_percentage: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// `numerator / denominator`, or 0 when there is nothing to divide by.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PhaseTotals {
    total: Duration,
    samples: u64,
}

impl PhaseTotals {
    fn add(&mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) {
        if let (Some(from), Some(to)) = (from, to) {
            self.total += elapsed_between(from, to);
            self.samples += 1;
        }
    }

    fn average_secs(&self) -> f64 {
        safe_ratio(self.total.as_secs_f64(), self.samples as f64)
    }
}

/// Running counters fed by the healing loop as faults and actions finish.
#[derive(Debug, Default)]
pub struct HealingLedger {
    total_faults: u64,
    resolved_faults: u64,
    first_detection: Option<DateTime<Utc>>,
    last_detection: Option<DateTime<Utc>>,
    total_actions: u64,
    successful_actions: u64,
    manual_interventions: u64,
    detection: PhaseTotals,
    diagnosis: PhaseTotals,
    recovery: PhaseTotals,
    resolution: PhaseTotals,
}

impl HealingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_detected(&mut self, fault: &Fault) {
        self.total_faults += 1;
        if self.first_detection.is_none() {
            self.first_detection = Some(fault.detected_at);
        }
        self.last_detection = Some(
            self.last_detection
                .map_or(fault.detected_at, |t| t.max(fault.detected_at)),
        );
        self.detection
            .add(Some(fault.detection.breach_started_at), Some(fault.detected_at));
    }

    pub fn record_diagnosed(&mut self, fault: &Fault) {
        self.diagnosis.add(fault.diagnosis_started_at, fault.diagnosed_at);
    }

    pub fn record_resolved(&mut self, fault: &Fault) {
        self.resolved_faults += 1;
        self.recovery.add(fault.recovery_started_at, fault.resolved_at);
        self.resolution.add(Some(fault.detected_at), fault.resolved_at);
    }

    pub fn record_action(&mut self, action: &RecoveryAction) {
        self.total_actions += 1;
        if action.success {
            self.successful_actions += 1;
        }
    }

    /// Operator approval or manual resolution.
    pub fn record_manual_intervention(&mut self) {
        self.manual_interventions += 1;
    }

    pub fn compute(&self, active_faults: u64, uptime_percentage: f64, now: DateTime<Utc>) -> HealingMetrics {
        let total_actions = self.total_actions as f64;
        let automated = total_actions - self.manual_interventions as f64;

        let mtbf_secs = match (self.first_detection, self.last_detection) {
            (Some(first), Some(last)) if self.total_faults > 1 => safe_ratio(
                elapsed_between(first, last).as_secs_f64(),
                (self.total_faults - 1) as f64,
            ),
            _ => 0.0,
        };

        HealingMetrics {
            total_faults: self.total_faults,
            active_faults,
            resolved_faults: self.resolved_faults,
            total_recovery_actions: self.total_actions,
            successful_recoveries: self.successful_actions,
            failed_recoveries: self.total_actions - self.successful_actions,
            manual_interventions: self.manual_interventions,
            resolution_rate: safe_ratio(self.resolved_faults as f64, self.total_faults as f64),
            recovery_success_rate: safe_ratio(self.successful_actions as f64, total_actions),
            automation_rate: safe_ratio(automated, total_actions).clamp(0.0, 1.0),
            mtbf_secs,
            mttr_secs: self.resolution.average_secs(),
            avg_detection_secs: self.detection.average_secs(),
            avg_diagnosis_secs: self.diagnosis.average_secs(),
            avg_recovery_secs: self.recovery.average_secs(),
            avg_resolution_secs: self.resolution.average_secs(),
            uptime_percentage,
            last_updated: Some(now),
        }
    }
}
