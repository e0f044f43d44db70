//! Threshold detection rules.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Severity;

/// Tolerance used by `Comparator::Eq`.
const EQ_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparator {
    Gt,
    Lt,
    Eq,
}

impl Comparator {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Lt => value < threshold,
            Comparator::Eq => (value - threshold).abs() <= EQ_EPSILON,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Gt => write!(f, ">"),
            Comparator::Lt => write!(f, "<"),
            Comparator::Eq => write!(f, "=="),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    pub id: String,
    pub name: String,
    pub component: String,
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
    /// How long the condition must hold before a fault is raised
    #[serde(default)]
    pub duration_secs: u64,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fault type to emit; the rule id when absent
    #[serde(default)]
    pub fault_type: Option<String>,
    /// Faults raised by this rule
    #[serde(default)]
    pub hit_count: u64,
}

fn default_enabled() -> bool {
    true
}

impl DetectionRule {
    pub fn fault_type(&self) -> &str {
        self.fault_type.as_deref().unwrap_or(&self.id)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn matches(&self, value: f64) -> bool {
        self.comparator.evaluate(value, self.threshold)
    }
}
