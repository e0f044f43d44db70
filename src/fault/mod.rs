//! Fault model.
//!
//! A [`Fault`] is one detected degradation tracked through its own lifecycle:
//! `DETECTED -> DIAGNOSING -> DIAGNOSING_COMPLETED -> RECOVERING -> RESOLVED`.
//! Status only ever moves forward; stages may be skipped (an operator can
//! resolve a fault that is still awaiting approval) but never revisited.

pub mod registry;

pub use registry::FaultRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::HealingError;
use crate::recovery::ActionId;
use crate::types::{RiskLevel, Severity};

static FAULT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Type-safe fault identifier.
///
/// Generated ids combine a process-wide sequence number with a random suffix,
/// so they stay unique even when many faults are created in the same instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaultId(String);

impl FaultId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        let seq = FAULT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("FAULT-{:08}-{}", seq, &suffix[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FaultId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Fault lifecycle. Variant order is the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultStatus {
    Detected,
    Diagnosing,
    DiagnosingCompleted,
    Recovering,
    Resolved,
}

impl FaultStatus {
    pub fn can_advance_to(self, next: FaultStatus) -> bool {
        next > self
    }

    pub fn is_terminal(self) -> bool {
        self == FaultStatus::Resolved
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultStatus::Detected => write!(f, "DETECTED"),
            FaultStatus::Diagnosing => write!(f, "DIAGNOSING"),
            FaultStatus::DiagnosingCompleted => write!(f, "DIAGNOSING_COMPLETED"),
            FaultStatus::Recovering => write!(f, "RECOVERING"),
            FaultStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// Identity used for de-duplication: one active fault per component and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultKey {
    pub component: String,
    pub fault_type: String,
}

impl FaultKey {
    pub fn new(component: impl Into<String>, fault_type: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            fault_type: fault_type.into(),
        }
    }
}

impl fmt::Display for FaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.fault_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionMethod {
    Rule,
    Anomaly,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::Rule => write!(f, "RULE"),
            DetectionMethod::Anomaly => write!(f, "ANOMALY"),
        }
    }
}

/// What triggered a fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionInfo {
    pub method: DetectionMethod,
    pub rule_id: Option<String>,
    pub metric: String,
    pub value: f64,
    /// Rule threshold, or the anomaly sensitivity for anomaly detections
    pub threshold: f64,
    /// When the triggering condition was first observed
    pub breach_started_at: DateTime<Utc>,
    pub anomaly_score: Option<f64>,
    /// Anomaly detector that raised the signal
    #[serde(default)]
    pub detector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub description: String,
    pub weight: f64,
}

impl Evidence {
    pub fn new(source: impl Into<String>, description: impl Into<String>, weight: f64) -> Self {
        Self {
            source: source.into(),
            description: description.into(),
            weight,
        }
    }
}

/// Inferred originating reason for a fault. Written once per fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    pub cause_type: String,
    /// Component the cause is attributed to (may differ from the faulting one)
    pub component: String,
    pub reason: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub related_faults: Vec<FaultId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactScope {
    Component,
    Service,
    System,
}

impl fmt::Display for ImpactScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactScope::Component => write!(f, "COMPONENT"),
            ImpactScope::Service => write!(f, "SERVICE"),
            ImpactScope::System => write!(f, "SYSTEM"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub scope: ImpactScope,
    pub severity: Severity,
    pub affected_components: Vec<String>,
    pub business_impact: String,
    pub recovery_time_estimate: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor: String,
    pub severity: RiskLevel,
    pub probability: f64,
    pub impact: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk: RiskLevel,
    pub risk_factors: Vec<RiskFactor>,
}

/// One plan per fault; consumed by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub fault_id: FaultId,
    pub selected_strategy: String,
    pub alternative_strategies: Vec<String>,
    pub estimated_recovery_time: Duration,
    pub risk_assessment: RiskAssessment,
    pub approval_required: bool,
    /// Confidence carried over from root-cause analysis
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempt_number: u32,
    pub strategy_used: String,
    pub action_id: ActionId,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub id: FaultId,
    pub fault_type: String,
    pub component: String,
    pub severity: Severity,
    pub status: FaultStatus,
    pub description: String,

    pub detected_at: DateTime<Utc>,
    pub diagnosis_started_at: Option<DateTime<Utc>>,
    pub diagnosed_at: Option<DateTime<Utc>>,
    pub recovery_started_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub detection: DetectionInfo,
    pub root_cause: Option<RootCause>,
    pub impact: Option<ImpactAssessment>,
    pub plan: Option<RecoveryPlan>,
    pub attempts: Vec<RecoveryAttempt>,

    /// Automatic attempts exhausted or plan needs sign-off
    pub requires_manual: bool,
    /// Earliest time the next automatic attempt may be queued
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// An action for this fault is queued or running
    pub action_in_flight: bool,
    pub alert_id: Option<String>,
}

impl Fault {
    pub fn new(
        fault_type: impl Into<String>,
        component: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        detection: DetectionInfo,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FaultId::generate(),
            fault_type: fault_type.into(),
            component: component.into(),
            severity,
            status: FaultStatus::Detected,
            description: description.into(),
            detected_at,
            diagnosis_started_at: None,
            diagnosed_at: None,
            recovery_started_at: None,
            resolved_at: None,
            detection,
            root_cause: None,
            impact: None,
            plan: None,
            attempts: Vec::new(),
            requires_manual: false,
            next_attempt_at: None,
            action_in_flight: false,
            alert_id: None,
        }
    }

    pub fn key(&self) -> FaultKey {
        FaultKey::new(self.component.clone(), self.fault_type.clone())
    }

    /// Move to `to`, stamping the matching phase timestamp.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if `to` is not strictly ahead of the current status.
    pub fn advance(&mut self, to: FaultStatus, at: DateTime<Utc>) -> Result<(), HealingError> {
        if !self.status.can_advance_to(to) {
            return Err(HealingError::InvalidTransition {
                fault_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        match to {
            FaultStatus::Detected => {}
            FaultStatus::Diagnosing => self.diagnosis_started_at = Some(at),
            FaultStatus::DiagnosingCompleted => self.diagnosed_at = Some(at),
            FaultStatus::Recovering => self.recovery_started_at = Some(at),
            FaultStatus::Resolved => self.resolved_at = Some(at),
        }
        self.status = to;
        Ok(())
    }

    /// Strategies already used by previous attempts, oldest first.
    pub fn tried_strategies(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for attempt in &self.attempts {
            if !seen.contains(&attempt.strategy_used) {
                seen.push(attempt.strategy_used.clone());
            }
        }
        seen
    }

    pub fn last_attempt(&self) -> Option<&RecoveryAttempt> {
        self.attempts.last()
    }
}
