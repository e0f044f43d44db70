//! Knowledge base of past fault cases and strategy outcomes.
//!
//! Every completed recovery action is folded in as a [`FaultCase`]. Per
//! (fault type, strategy) pair the base keeps attempt and success counts; the
//! smoothed success rate `(successes + 1) / (attempts + 2)` starts at 0.5 for
//! an unseen pair and moves towards the observed rate as evidence accumulates.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::fault::FaultId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultCase {
    pub fault_id: FaultId,
    pub fault_type: String,
    pub component: String,
    pub root_cause: Option<String>,
    pub strategy: String,
    pub success: bool,
    pub recovery_time: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolutionStats {
    pub attempts: u32,
    pub successes: u32,
    pub total_recovery_time: Duration,
}

impl SolutionStats {
    pub fn smoothed_success_rate(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.attempts as f64 + 2.0)
    }

    /// Mean duration of successful recoveries.
    pub fn average_recovery_time(&self) -> Option<Duration> {
        if self.successes == 0 {
            None
        } else {
            Some(self.total_recovery_time / self.successes)
        }
    }
}

/// Smoothed rate for a pair with no recorded outcomes.
pub const PRIOR_SUCCESS_RATE: f64 = 0.5;

#[derive(Default)]
struct KnowledgeState {
    cases: VecDeque<FaultCase>,
    stats: HashMap<(String, String), SolutionStats>,
}

pub struct KnowledgeBase {
    state: RwLock<KnowledgeState>,
    case_cap: usize,
}

impl KnowledgeBase {
    pub fn new(case_cap: usize) -> Self {
        Self {
            state: RwLock::new(KnowledgeState::default()),
            case_cap: case_cap.max(1),
        }
    }

    pub async fn record_outcome(&self, case: FaultCase) {
        let mut state = self.state.write().await;
        let stats = state
            .stats
            .entry((case.fault_type.clone(), case.strategy.clone()))
            .or_default();
        stats.attempts += 1;
        if case.success {
            stats.successes += 1;
            stats.total_recovery_time += case.recovery_time;
        }
        debug!(
            fault_type = %case.fault_type,
            strategy = %case.strategy,
            success = case.success,
            attempts = stats.attempts,
            rate = stats.smoothed_success_rate(),
            "Knowledge base updated"
        );

        state.cases.push_back(case);
        while state.cases.len() > self.case_cap {
            state.cases.pop_front();
        }
    }

    pub async fn stats(&self, fault_type: &str, strategy: &str) -> Option<SolutionStats> {
        self.state
            .read()
            .await
            .stats
            .get(&(fault_type.to_string(), strategy.to_string()))
            .cloned()
    }

    pub async fn success_rate(&self, fault_type: &str, strategy: &str) -> f64 {
        self.stats(fault_type, strategy)
            .await
            .map(|s| s.smoothed_success_rate())
            .unwrap_or(PRIOR_SUCCESS_RATE)
    }

    /// Past successful recoveries of the same fault type on the same component.
    pub async fn matching_cases(&self, fault_type: &str, component: &str) -> Vec<FaultCase> {
        self.state
            .read()
            .await
            .cases
            .iter()
            .filter(|c| c.success && c.fault_type == fault_type && c.component == component)
            .cloned()
            .collect()
    }

    pub async fn case_count(&self) -> usize {
        self.state.read().await.cases.len()
    }
}
