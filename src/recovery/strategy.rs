//! Recovery strategy catalog.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Command,
    ApiCall,
    ConfigChange,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Command => write!(f, "COMMAND"),
            StepKind::ApiCall => write!(f, "API_CALL"),
            StepKind::ConfigChange => write!(f, "CONFIG_CHANGE"),
        }
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Record the error and move on
    Continue,
    /// Stop the whole action as failed
    Abort,
    /// Re-run up to the strategy's `max_retries`, then abort
    Retry,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => write!(f, "CONTINUE"),
            FailurePolicy::Abort => write!(f, "ABORT"),
            FailurePolicy::Retry => write!(f, "RETRY"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub id: String,
    pub name: String,
    pub kind: StepKind,
    /// Command line, `METHOD /path`, or `key=value` depending on `kind`.
    /// `{component}` is replaced with the faulting component.
    pub payload: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub timeout_secs: u64,
    pub on_failure: FailurePolicy,
}

impl RecoveryStep {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Payload with placeholders filled in for `component`.
    pub fn render_payload(&self, component: &str) -> String {
        self.payload.replace("{component}", component)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Component names this strategy may target; `*` matches any
    pub applicable_components: Vec<String>,
    pub steps: Vec<RecoveryStep>,
    /// Smoothed success rate below which the knowledge base demotes this strategy
    pub success_threshold: f64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub cooldown_secs: u64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_approval: bool,
}

impl RecoveryStrategy {
    pub fn applies_to(&self, component: &str) -> bool {
        self.applicable_components
            .iter()
            .any(|c| c == "*" || c == component)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Sum of step timeouts, bounded by the strategy timeout.
    pub fn estimated_duration(&self) -> Duration {
        let steps: Duration = self.steps.iter().map(RecoveryStep::timeout).sum();
        steps.min(self.timeout())
    }
}

/// Read-only strategy lookup shared by diagnosis and execution.
#[derive(Debug, Clone, Default)]
pub struct StrategyCatalog {
    strategies: HashMap<String, Arc<RecoveryStrategy>>,
}

impl StrategyCatalog {
    pub fn new(strategies: Vec<RecoveryStrategy>) -> Self {
        Self {
            strategies: strategies
                .into_iter()
                .map(|s| (s.id.clone(), Arc::new(s)))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<RecoveryStrategy>> {
        self.strategies.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.strategies.keys().cloned().collect();
        ids.sort();
        ids
    }
}
