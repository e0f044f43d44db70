//! Recovery actions: one per recovery attempt on a fault.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::StepKind;
use crate::clock::elapsed_between;
use crate::fault::{Fault, FaultId};

static ACTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(String);

impl ActionId {
    #[must_use]
    pub fn generate() -> Self {
        let seq = ACTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("ACT-{:08}-{}", seq, &suffix[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Stopped by the strategy timeout or shutdown
    Aborted,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Aborted
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "PENDING"),
            ActionStatus::Running => write!(f, "RUNNING"),
            ActionStatus::Completed => write!(f, "COMPLETED"),
            ActionStatus::Failed => write!(f, "FAILED"),
            ActionStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Initiator {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub step_id: String,
    pub name: String,
    pub kind: StepKind,
    pub status: StepStatus,
    /// Executions including retries
    pub attempts: u32,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub id: ActionId,
    pub fault_id: FaultId,
    pub component: String,
    pub fault_type: String,
    pub strategy_id: String,
    pub status: ActionStatus,
    pub initiator: Initiator,
    pub approved_by: Option<String>,
    pub steps: Vec<ExecutedStep>,
    /// Fraction of declared steps finished, in [0, 1]
    pub progress: f64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Set once the pool hands the action to a worker. Actions finished while
    /// still queued never ran any step.
    #[serde(default)]
    pub dispatched: bool,
}

impl RecoveryAction {
    pub fn new(
        fault: &Fault,
        strategy_id: impl Into<String>,
        initiator: Initiator,
        approved_by: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActionId::generate(),
            fault_id: fault.id.clone(),
            component: fault.component.clone(),
            fault_type: fault.fault_type.clone(),
            strategy_id: strategy_id.into(),
            status: ActionStatus::Pending,
            initiator,
            approved_by,
            steps: Vec::new(),
            progress: 0.0,
            success: false,
            created_at,
            started_at: None,
            completed_at: None,
            failure_reason: None,
            dispatched: false,
        }
    }

    /// Wall time between start and completion.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(elapsed_between(start, end)),
            _ => None,
        }
    }

    /// Mark the action terminal. `success` holds only for `Completed`.
    pub fn finish(
        &mut self,
        status: ActionStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.success = status == ActionStatus::Completed;
        self.failure_reason = reason;
        self.completed_at = Some(at);
    }
}
