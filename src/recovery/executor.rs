//! Recovery Executor
//!
//! Bounded worker pool for recovery actions:
//! - `submit` queues an action as PENDING
//! - `dispatch` promotes queued actions to RUNNING while fewer than
//!   `max_concurrent` are running, never two for the same fault
//! - each running action executes its strategy's steps in order inside a
//!   `JoinSet` task, under the per-step and per-strategy timeouts
//! - finished actions go to a capped history and are sent on the completion
//!   channel for the healing loop to fold back into faults and the knowledge base
//!
//! A pool that is full is backpressure, not an error: the action stays queued
//! until a later dispatch tick finds a free slot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::action::{ActionId, ActionStatus, ExecutedStep, RecoveryAction, StepStatus};
use super::step::{StepError, StepExecutor};
use super::strategy::{FailurePolicy, RecoveryStrategy, StrategyCatalog};
use crate::clock::Clock;
use crate::fault::FaultId;
use crate::metrics;

#[derive(Default)]
struct ExecutorState {
    queue: VecDeque<RecoveryAction>,
    running: HashMap<ActionId, RecoveryAction>,
    history: VecDeque<RecoveryAction>,
}

impl ExecutorState {
    fn fault_busy(&self, fault_id: &FaultId) -> bool {
        self.running.values().any(|a| &a.fault_id == fault_id)
    }

    fn archive(&mut self, action: RecoveryAction, cap: usize) {
        self.history.push_back(action);
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }
}

/// Shared by the executor and its worker tasks.
struct Shared {
    steps: Arc<dyn StepExecutor>,
    clock: Arc<dyn Clock>,
    state: Mutex<ExecutorState>,
    history_cap: usize,
    completed_tx: mpsc::UnboundedSender<RecoveryAction>,
}

impl Shared {
    async fn complete(&self, action: RecoveryAction) {
        {
            let mut state = self.state.lock().await;
            state.running.remove(&action.id);
            metrics::set_running_actions(state.running.len());
            state.archive(action.clone(), self.history_cap);
        }
        if self.completed_tx.send(action).is_err() {
            debug!("Recovery completion receiver dropped");
        }
    }

    async fn set_progress(&self, id: &ActionId, progress: f64) {
        if let Some(running) = self.state.lock().await.running.get_mut(id) {
            running.progress = progress;
        }
    }
}

pub struct RecoveryExecutor {
    catalog: Arc<StrategyCatalog>,
    shared: Arc<Shared>,
    max_concurrent: usize,
    tasks: Mutex<JoinSet<()>>,
}

impl RecoveryExecutor {
    /// Returns the executor and the receiving end of its completion channel.
    pub fn new(
        catalog: Arc<StrategyCatalog>,
        steps: Arc<dyn StepExecutor>,
        clock: Arc<dyn Clock>,
        max_concurrent: usize,
        history_cap: usize,
    ) -> (Self, mpsc::UnboundedReceiver<RecoveryAction>) {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let executor = Self {
            catalog,
            shared: Arc::new(Shared {
                steps,
                clock,
                state: Mutex::new(ExecutorState::default()),
                history_cap: history_cap.max(1),
                completed_tx,
            }),
            max_concurrent: max_concurrent.max(1),
            tasks: Mutex::new(JoinSet::new()),
        };
        (executor, completed_rx)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue an action. An unknown strategy fails it on the spot without
    /// executing anything; the failure is still archived and reported.
    pub async fn submit(&self, mut action: RecoveryAction) -> ActionId {
        let id = action.id.clone();
        if !self.catalog.contains(&action.strategy_id) {
            let now = self.shared.clock.now();
            action.started_at = Some(now);
            action.finish(
                ActionStatus::Failed,
                Some(format!("unknown strategy: {}", action.strategy_id)),
                now,
            );
            warn!(
                action_id = %id,
                fault_id = %action.fault_id,
                strategy = %action.strategy_id,
                "Recovery action failed: unknown strategy"
            );
            metrics::record_recovery(&action.strategy_id, "rejected", 0.0);
            self.shared.complete(action).await;
            return id;
        }

        info!(
            action_id = %id,
            fault_id = %action.fault_id,
            strategy = %action.strategy_id,
            initiator = ?action.initiator,
            "Recovery action queued"
        );
        action.status = ActionStatus::Pending;
        self.shared.state.lock().await.queue.push_back(action);
        id
    }

    /// Promote queued actions while the pool has room. Returns how many started.
    pub async fn dispatch(&self) -> usize {
        let mut started = 0;
        let mut state = self.shared.state.lock().await;
        let mut tasks = self.tasks.lock().await;

        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }

        while state.running.len() < self.max_concurrent {
            let Some(pos) = state
                .queue
                .iter()
                .position(|a| !state.fault_busy(&a.fault_id))
            else {
                break;
            };
            let Some(mut action) = state.queue.remove(pos) else {
                break;
            };
            let Some(strategy) = self.catalog.get(&action.strategy_id) else {
                // Catalog is read-only after startup; submit already checked.
                continue;
            };

            action.status = ActionStatus::Running;
            action.dispatched = true;
            action.started_at = Some(self.shared.clock.now());
            state.running.insert(action.id.clone(), action.clone());
            metrics::set_running_actions(state.running.len());

            info!(
                action_id = %action.id,
                fault_id = %action.fault_id,
                strategy = %strategy.id,
                running = state.running.len(),
                max = self.max_concurrent,
                "Recovery action started"
            );

            let shared = self.shared.clone();
            tasks.spawn(async move { run_action(shared, action, strategy).await });
            started += 1;
        }

        if !state.queue.is_empty() && started == 0 {
            debug!(
                queued = state.queue.len(),
                running = state.running.len(),
                "Recovery pool full, actions remain queued"
            );
        }
        started
    }

    pub async fn queued_count(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    pub async fn running_count(&self) -> usize {
        self.shared.state.lock().await.running.len()
    }

    /// Copies of the running actions, oldest start first.
    pub async fn running(&self) -> Vec<RecoveryAction> {
        let mut running: Vec<RecoveryAction> =
            self.shared.state.lock().await.running.values().cloned().collect();
        running.sort_by_key(|a| a.started_at);
        running
    }

    /// Most recent `limit` finished actions, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<RecoveryAction> {
        let state = self.shared.state.lock().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.shared.state.lock().await.history.len()
    }

    /// Wait for every running action to finish (each is bounded by its strategy
    /// timeout), then abort whatever never left the queue.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for running recovery actions");
        }
        while let Some(result) = tasks.join_next().await {
            log_join_result(result);
        }

        let pending: Vec<RecoveryAction> = self.shared.state.lock().await.queue.drain(..).collect();
        for mut action in pending {
            let now = self.shared.clock.now();
            action.finish(
                ActionStatus::Aborted,
                Some("shut down before dispatch".to_string()),
                now,
            );
            self.shared.complete(action).await;
        }
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "CRITICAL: Recovery action task panicked");
        } else {
            warn!(error = %e, "Recovery action task cancelled");
        }
    }
}

async fn run_action(shared: Arc<Shared>, mut action: RecoveryAction, strategy: Arc<RecoveryStrategy>) {
    let outcome = timeout(
        strategy.timeout(),
        run_steps(&shared, &mut action, &strategy),
    )
    .await;

    let now = shared.clock.now();
    match outcome {
        Ok(Ok(())) => action.finish(ActionStatus::Completed, None, now),
        Ok(Err(reason)) => action.finish(ActionStatus::Failed, Some(reason), now),
        Err(_) => action.finish(
            ActionStatus::Aborted,
            Some(format!(
                "strategy {} exceeded its {}s timeout",
                strategy.id, strategy.timeout_secs
            )),
            now,
        ),
    }

    let secs = action.duration().map(|d| d.as_secs_f64()).unwrap_or(0.0);
    let label = match action.status {
        ActionStatus::Completed => "success",
        ActionStatus::Aborted => "aborted",
        _ => "failed",
    };
    metrics::record_recovery(&action.strategy_id, label, secs);

    if action.success {
        info!(
            action_id = %action.id,
            fault_id = %action.fault_id,
            strategy = %action.strategy_id,
            steps = action.steps.len(),
            "Recovery action completed"
        );
    } else {
        warn!(
            action_id = %action.id,
            fault_id = %action.fault_id,
            strategy = %action.strategy_id,
            status = %action.status,
            reason = action.failure_reason.as_deref().unwrap_or(""),
            "Recovery action did not succeed"
        );
    }

    shared.complete(action).await;
}

/// Steps in declared order. `Err` carries the abort reason.
async fn run_steps(
    shared: &Shared,
    action: &mut RecoveryAction,
    strategy: &RecoveryStrategy,
) -> Result<(), String> {
    let total = strategy.steps.len();
    if total == 0 {
        action.progress = 1.0;
        return Ok(());
    }

    for (idx, step) in strategy.steps.iter().enumerate() {
        let max_attempts = match step.on_failure {
            FailurePolicy::Retry => 1 + strategy.max_retries,
            FailurePolicy::Continue | FailurePolicy::Abort => 1,
        };
        let started_at = shared.clock.now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            let result = match timeout(step.timeout(), shared.steps.execute(&action.component, step)).await {
                Ok(r) => r,
                Err(_) => Err(StepError::Timeout(step.timeout())),
            };
            match result {
                Err(e) if attempts < max_attempts => {
                    warn!(
                        action_id = %action.id,
                        step_id = %step.id,
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "Recovery step failed, retrying"
                    );
                }
                other => break other,
            }
        };

        let mut executed = ExecutedStep {
            step_id: step.id.clone(),
            name: step.name.clone(),
            kind: step.kind,
            status: StepStatus::Completed,
            attempts,
            output: None,
            error: None,
            started_at,
            completed_at: shared.clock.now(),
        };

        match result {
            Ok(output) => {
                executed.output = Some(output);
                action.steps.push(executed);
            }
            Err(e) => {
                executed.error = Some(e.to_string());
                if step.on_failure == FailurePolicy::Continue {
                    debug!(
                        action_id = %action.id,
                        step_id = %step.id,
                        error = %e,
                        "Recovery step failed, continuing"
                    );
                    action.steps.push(executed);
                } else {
                    executed.status = StepStatus::Failed;
                    action.steps.push(executed);
                    action.progress = idx as f64 / total as f64;
                    return Err(format!(
                        "step {} failed ({} policy, {} attempt(s)): {}",
                        step.id, step.on_failure, attempts, e
                    ));
                }
            }
        }

        action.progress = (idx + 1) as f64 / total as f64;
        shared.set_progress(&action.id, action.progress).await;
    }
    Ok(())
}
