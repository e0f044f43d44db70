//! Self-Healing System
//!
//! Wires the health monitor, fault detector, diagnosis engine, recovery
//! executor and circuit table into one control loop. Each stage runs as its
//! own periodic task; stages only meet through the fault registry, the health
//! snapshot and the circuit table.
//!
//! Every stage is also callable directly (`run_detection`, `run_diagnosis`,
//! ...) so an embedding service or a test can drive the loop tick by tick.

pub mod scheduler;
pub mod stats;

pub use scheduler::Scheduler;
pub use stats::{safe_ratio, HealingLedger, HealingMetrics};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::alerting::{Alert, AlertSink};
use crate::clock::{Clock, SystemClock};
use crate::config::HealingConfig;
use crate::detection::{AnomalyDetector, DetectionRecord, DetectionRule, FaultDetector, ZScoreDetector};
use crate::diagnosis::{
    should_auto_recover, CorrelationEngine, DependencyGraph, DiagnosisEngine,
    DiagnosisEngineConfig, FaultCase, ImpactAssessor, KnowledgeBase, RootCauseAnalyzer,
};
use crate::error::HealingError;
use crate::fault::{Fault, FaultId, FaultRegistry, FaultStatus, RecoveryAttempt, RecoveryPlan};
use crate::logging::LogThrottle;
use crate::metrics;
use crate::monitor::{ComponentChecker, ComponentHealth, HealthMonitor, HealthSample, MetricThresholdChecker, SystemHealth};
use crate::recovery::{ActionId, ActionStatus, Initiator, RecoveryAction, RecoveryExecutor, StepExecutor, StrategyCatalog};
use crate::resilience::{CircuitBreaker, CircuitRegistry, CircuitSnapshot};
use crate::source::MetricSource;
use crate::types::Severity;

/// Strategy whose success also opens the component's circuit.
const CIRCUIT_TRIP_STRATEGY: &str = "circuit_breaker_trip";

/// Interval between "faults awaiting approval" reminders.
const APPROVAL_REMINDER_INTERVAL: Duration = Duration::from_secs(60);

/// External collaborators the control loop calls into.
pub struct Collaborators {
    pub metrics: Arc<dyn MetricSource>,
    pub steps: Arc<dyn StepExecutor>,
    pub alerts: Arc<dyn AlertSink>,
    pub clock: Arc<dyn Clock>,
    /// Replaces the threshold checkers built from the configured components
    pub checkers: Option<Vec<Arc<dyn ComponentChecker>>>,
    /// Replaces the default z-score detector
    pub anomaly: Option<Box<dyn AnomalyDetector>>,
    /// Replaces the evidence-weighted root-cause scoring
    pub analyzer: Option<Arc<dyn RootCauseAnalyzer>>,
    /// Replaces the dependency-based impact scoring
    pub impact: Option<Arc<dyn ImpactAssessor>>,
}

impl Collaborators {
    pub fn new(
        metrics: Arc<dyn MetricSource>,
        steps: Arc<dyn StepExecutor>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            metrics,
            steps,
            alerts,
            clock: Arc::new(SystemClock),
            checkers: None,
            anomaly: None,
            analyzer: None,
            impact: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_checkers(mut self, checkers: Vec<Arc<dyn ComponentChecker>>) -> Self {
        self.checkers = Some(checkers);
        self
    }

    pub fn with_anomaly_detector(mut self, detector: Box<dyn AnomalyDetector>) -> Self {
        self.anomaly = Some(detector);
        self
    }

    pub fn with_root_cause_analyzer(mut self, analyzer: Arc<dyn RootCauseAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_impact_assessor(mut self, impact: Arc<dyn ImpactAssessor>) -> Self {
        self.impact = Some(impact);
        self
    }
}

/// Operator-facing summary returned by [`SelfHealingSystem::get_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub running: bool,
    pub enabled: bool,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub active_faults: usize,
    pub component_monitors: usize,
    pub strategies: usize,
    pub detection_rules: usize,
    pub circuits: usize,
    pub recovery_history: usize,
    pub resolved_faults: usize,
    pub queued_actions: usize,
    pub running_actions: usize,
    pub system_health: SystemHealth,
    pub metrics: HealingMetrics,
}

enum CompletionOutcome {
    Resolve,
    Retry { strategy: String, at: DateTime<Utc> },
    NeedsApproval,
    Exhausted(Box<Fault>),
}

struct Inner {
    config: HealingConfig,
    clock: Arc<dyn Clock>,
    monitor: HealthMonitor,
    detector: FaultDetector,
    diagnosis: DiagnosisEngine,
    executor: RecoveryExecutor,
    completions: Mutex<mpsc::UnboundedReceiver<RecoveryAction>>,
    catalog: Arc<StrategyCatalog>,
    knowledge: Arc<KnowledgeBase>,
    circuits: CircuitRegistry,
    faults: FaultRegistry,
    alerts: Arc<dyn AlertSink>,
    ledger: Mutex<HealingLedger>,
    metrics: RwLock<HealingMetrics>,
    approval_reminder: Mutex<LogThrottle>,
    running: AtomicBool,
    scheduler: Mutex<Option<Scheduler>>,
}

/// Handle to the control loop. Clones share the same system.
///
/// Background tasks hold a handle too, so `stop` must be called to shut the
/// loop down; dropping the last user handle is not enough.
#[derive(Clone)]
pub struct SelfHealingSystem {
    inner: Arc<Inner>,
}

impl SelfHealingSystem {
    /// Build the system from a validated configuration.
    ///
    /// # Errors
    /// `Config` if the configuration fails validation.
    pub fn new(config: HealingConfig, collaborators: Collaborators) -> Result<Self, HealingError> {
        config.validate()?;
        let Collaborators {
            metrics: source,
            steps,
            alerts,
            clock,
            checkers,
            anomaly,
            analyzer,
            impact,
        } = collaborators;

        let catalog = Arc::new(StrategyCatalog::new(config.strategies.clone()));
        let knowledge = Arc::new(KnowledgeBase::new(config.recovery_history_cap));

        let checkers = checkers.unwrap_or_else(|| {
            config
                .components
                .iter()
                .cloned()
                .map(|c| {
                    Arc::new(MetricThresholdChecker::new(c, Arc::clone(&source), Arc::clone(&clock)))
                        as Arc<dyn ComponentChecker>
                })
                .collect()
        });
        let monitor = HealthMonitor::new(
            checkers,
            config.health_history_cap,
            config.alert_cap,
            Arc::clone(&clock),
        );

        let mut detector = FaultDetector::new(
            config.rules.clone(),
            Arc::clone(&source),
            Arc::clone(&clock),
            config.correlation_window(),
            config.detection_history_cap,
        );
        if config.anomaly.enabled {
            let targets: Vec<(String, String)> = config
                .components
                .iter()
                .flat_map(|c| {
                    c.thresholds
                        .iter()
                        .map(move |t| (c.name.clone(), t.metric.clone()))
                })
                .collect();
            let anomaly = anomaly.unwrap_or_else(|| {
                Box::new(ZScoreDetector::from_config(&config.anomaly)) as Box<dyn AnomalyDetector>
            });
            detector = detector.with_anomaly_detector(anomaly, config.anomaly.clone(), targets);
        }

        let mut diagnosis = DiagnosisEngine::new(
            CorrelationEngine::new(
                config.correlation_rules.clone(),
                config.correlation_window(),
                config.detection_history_cap,
            ),
            Arc::clone(&knowledge),
            DependencyGraph::new(monitor.dependency_map()),
            Arc::clone(&catalog),
            DiagnosisEngineConfig {
                strategy_table: config.strategy_table.clone(),
                default_strategy: config.default_strategy.clone(),
                default_alternates: config.default_alternates.clone(),
                confidence_floor: config.confidence_floor,
            },
            Arc::clone(&clock),
        );
        if let Some(analyzer) = analyzer {
            diagnosis = diagnosis.with_analyzer(analyzer);
        }
        if let Some(impact) = impact {
            diagnosis = diagnosis.with_impact_assessor(impact);
        }

        let (executor, completions) = RecoveryExecutor::new(
            Arc::clone(&catalog),
            steps,
            Arc::clone(&clock),
            config.max_concurrent_actions,
            config.recovery_history_cap,
        );

        let circuits = CircuitRegistry::new(
            config.circuit.clone(),
            config.circuits.clone(),
            Arc::clone(&clock),
        );

        let faults = FaultRegistry::with_archive_cap(config.recovery_history_cap);

        info!(
            components = monitor.component_count(),
            rules = config.rules.len(),
            strategies = catalog.len(),
            max_concurrent_actions = config.max_concurrent_actions,
            auto_restart = config.auto_restart,
            "Self healing system initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                monitor,
                detector,
                diagnosis,
                executor,
                completions: Mutex::new(completions),
                catalog,
                knowledge,
                circuits,
                faults,
                alerts,
                ledger: Mutex::new(HealingLedger::new()),
                metrics: RwLock::new(HealingMetrics::default()),
                approval_reminder: Mutex::new(LogThrottle::new(APPROVAL_REMINDER_INTERVAL)),
                running: AtomicBool::new(false),
                scheduler: Mutex::new(None),
            }),
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn config(&self) -> &HealingConfig {
        &self.inner.config
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.inner.knowledge
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start every periodic stage.
    ///
    /// # Errors
    /// `Disabled` when the config disables healing, `AlreadyRunning` on a second start.
    pub async fn start(&self) -> Result<(), HealingError> {
        if !self.inner.config.enabled {
            return Err(HealingError::Disabled);
        }
        let mut slot = self.inner.scheduler.lock().await;
        if slot.is_some() {
            return Err(HealingError::AlreadyRunning);
        }

        let cfg = &self.inner.config;
        let mut scheduler = Scheduler::new();
        self.every(&mut scheduler, "health_check", cfg.health_check_interval(), |sys| async move {
            sys.run_health_check().await;
        });
        self.every(&mut scheduler, "fault_detection", cfg.detection_interval(), |sys| async move {
            sys.run_detection().await;
        });
        self.every(&mut scheduler, "diagnosis", cfg.diagnosis_interval(), |sys| async move {
            sys.run_diagnosis().await;
        });
        self.every(&mut scheduler, "recovery_dispatch", cfg.recovery_interval(), |sys| async move {
            sys.run_recovery_dispatch().await;
        });
        self.every(&mut scheduler, "circuit_evaluation", cfg.circuit_interval(), |sys| async move {
            sys.run_circuit_evaluation();
        });
        self.every(&mut scheduler, "metrics_aggregation", cfg.metrics_interval(), |sys| async move {
            sys.run_metrics_aggregation().await;
        });

        info!(tasks = scheduler.task_count(), "Self healing system started");
        *slot = Some(scheduler);
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn every<F, Fut>(&self, scheduler: &mut Scheduler, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(SelfHealingSystem) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sys = self.clone();
        scheduler.spawn_periodic(name, period, move || tick(sys.clone()));
    }

    /// Stop the periodic stages, wait for running recovery actions, then fold
    /// in their outcomes.
    ///
    /// # Errors
    /// `NotRunning` if the system was never started or is already stopped.
    pub async fn stop(&self) -> Result<(), HealingError> {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .await
            .take()
            .ok_or(HealingError::NotRunning)?;
        info!("Stopping self healing system");

        scheduler.shutdown().await;
        self.inner.executor.drain().await;
        let folded = self.process_completions().await;
        self.run_metrics_aggregation().await;
        self.inner.running.store(false, Ordering::SeqCst);

        info!(final_outcomes = folded, "Self healing system stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ---- stages ----------------------------------------------------------

    pub async fn run_health_check(&self) -> SystemHealth {
        self.inner.monitor.check_all().await
    }

    /// Evaluate rules and anomalies; register and alert on new faults.
    pub async fn run_detection(&self) -> Vec<FaultId> {
        let active = self.inner.faults.active_keys().await;
        let detected = self.inner.detector.evaluate(&active).await;

        let mut ids = Vec::with_capacity(detected.len());
        for mut fault in detected {
            self.inner.diagnosis.record_detection(&fault).await;
            self.inner.ledger.lock().await.record_detected(&fault);

            let alert = Alert::new(
                &fault.fault_type,
                fault.severity,
                &fault.component,
                &fault.description,
                fault.detected_at,
            )
            .with_metadata("fault_id", fault.id.to_string())
            .with_metadata("detection", fault.detection.method.to_string());
            let alert = match &fault.detection.detector {
                Some(name) => alert.with_metadata("detector", name.clone()),
                None => alert,
            };
            fault.alert_id = Some(alert.id.clone());

            ids.push(fault.id.clone());
            self.inner.faults.insert(fault).await;
            self.raise_alert(alert).await;
        }
        ids
    }

    /// Diagnose every DETECTED fault once and start recovery where allowed.
    pub async fn run_diagnosis(&self) -> usize {
        let claimed = self.inner.faults.claim_detected(self.now()).await;
        let count = claimed.len();
        for fault in claimed {
            self.diagnose_fault(fault).await;
        }
        count
    }

    async fn diagnose_fault(&self, fault: Fault) {
        let active: Vec<Fault> = self.inner.faults.snapshot().await.into_values().collect();
        let diagnosis = match self.inner.diagnosis.diagnose(&fault, &active).await {
            Ok(d) => d,
            Err(e) => {
                error!(fault_id = %fault.id, error = %e, "Diagnosis failed, fault needs manual recovery");
                let now = self.now();
                self.inner.faults.update(&fault.id, |f| f.requires_manual = true).await;
                if let Err(e) = self
                    .inner
                    .faults
                    .transition(&fault.id, FaultStatus::DiagnosingCompleted, now)
                    .await
                {
                    debug!(fault_id = %fault.id, error = %e, "Fault moved on during diagnosis");
                }
                let alert = Alert::new(
                    "diagnosis_failed",
                    Severity::Critical,
                    &fault.component,
                    format!("No recovery plan for fault {}: {}", fault.id, e),
                    now,
                )
                .with_metadata("fault_id", fault.id.to_string());
                self.raise_alert(alert).await;
                return;
            }
        };

        let plan = diagnosis.plan.clone();
        self.inner
            .faults
            .update(&fault.id, |f| {
                f.root_cause = Some(diagnosis.root_cause);
                f.impact = Some(diagnosis.impact);
                f.plan = Some(diagnosis.plan);
            })
            .await;

        let fault = match self
            .inner
            .faults
            .transition(&fault.id, FaultStatus::DiagnosingCompleted, self.now())
            .await
        {
            Ok(f) => f,
            Err(e) => {
                debug!(fault_id = %fault.id, error = %e, "Fault closed before diagnosis finished");
                return;
            }
        };
        self.inner.ledger.lock().await.record_diagnosed(&fault);

        if should_auto_recover(self.inner.config.auto_restart, &fault, &plan) {
            if let Err(e) = self
                .start_recovery(&fault.id, plan.selected_strategy.clone(), Initiator::Auto, None)
                .await
            {
                warn!(fault_id = %fault.id, error = %e, "Could not start automatic recovery");
            }
        } else {
            self.hold_for_approval(&fault, &plan).await;
        }
    }

    async fn hold_for_approval(&self, fault: &Fault, plan: &RecoveryPlan) {
        let reason = if !self.inner.config.auto_restart {
            "auto restart disabled".to_string()
        } else if fault.severity == Severity::Critical {
            "CRITICAL severity".to_string()
        } else if plan.approval_required {
            "plan requires approval".to_string()
        } else {
            format!("{} risk plan", plan.risk_assessment.overall_risk)
        };
        self.inner
            .faults
            .update(&fault.id, |f| f.requires_manual = true)
            .await;

        info!(
            fault_id = %fault.id,
            component = %fault.component,
            strategy = %plan.selected_strategy,
            reason = %reason,
            "Recovery awaiting manual approval"
        );

        let severity = if fault.severity == Severity::Critical {
            Severity::Critical
        } else {
            Severity::High
        };
        let alert = Alert::new(
            "recovery_approval_required",
            severity,
            &fault.component,
            format!(
                "Fault {} ({}) needs approval to run {}: {}",
                fault.id, fault.fault_type, plan.selected_strategy, reason
            ),
            self.now(),
        )
        .with_metadata("fault_id", fault.id.to_string())
        .with_metadata("strategy", plan.selected_strategy.clone());
        self.raise_alert(alert).await;
    }

    async fn start_recovery(
        &self,
        fault_id: &FaultId,
        strategy: String,
        initiator: Initiator,
        approved_by: Option<String>,
    ) -> Result<ActionId, HealingError> {
        let now = self.now();
        let action = self
            .inner
            .faults
            .update(fault_id, |f| {
                if f.action_in_flight {
                    return Err(HealingError::ActionInFlight(f.id.clone()));
                }
                if f.status < FaultStatus::Recovering {
                    f.advance(FaultStatus::Recovering, now)?;
                }
                f.action_in_flight = true;
                f.next_attempt_at = None;
                Ok(RecoveryAction::new(f, strategy, initiator, approved_by, now))
            })
            .await
            .ok_or_else(|| HealingError::FaultNotFound(fault_id.clone()))??;

        info!(
            fault_id = %fault_id,
            strategy = %action.strategy_id,
            initiator = ?initiator,
            "Fault recovery started"
        );
        Ok(self.inner.executor.submit(action).await)
    }

    /// Fold finished actions in, queue due retries, then fill the pool.
    pub async fn run_recovery_dispatch(&self) -> usize {
        self.process_completions().await;
        self.queue_due_retries().await;
        self.remind_pending_approvals().await;
        self.inner.executor.dispatch().await
    }

    /// Apply every finished action to its fault and the knowledge base.
    pub async fn process_completions(&self) -> usize {
        let mut finished = Vec::new();
        {
            let mut rx = self.inner.completions.lock().await;
            while let Ok(action) = rx.try_recv() {
                finished.push(action);
            }
        }
        let count = finished.len();
        for action in finished {
            self.handle_completion(action).await;
        }
        count
    }

    async fn handle_completion(&self, action: RecoveryAction) {
        if !action.dispatched {
            self.handle_undispatched(action).await;
            return;
        }
        let now = self.now();
        let root_cause = self
            .inner
            .faults
            .get(&action.fault_id)
            .await
            .and_then(|f| f.root_cause.map(|r| r.cause_type));
        self.inner
            .knowledge
            .record_outcome(FaultCase {
                fault_id: action.fault_id.clone(),
                fault_type: action.fault_type.clone(),
                component: action.component.clone(),
                root_cause,
                strategy: action.strategy_id.clone(),
                success: action.success,
                recovery_time: action.duration().unwrap_or_default(),
                timestamp: now,
            })
            .await;
        self.inner.ledger.lock().await.record_action(&action);

        if action.success && action.strategy_id == CIRCUIT_TRIP_STRATEGY {
            self.inner.circuits.get_or_create(&action.component).force_open();
        }

        let max_attempts = self.inner.config.max_restart_attempts;
        let auto_restart = self.inner.config.auto_restart;
        let catalog = Arc::clone(&self.inner.catalog);
        let outcome = self
            .inner
            .faults
            .update(&action.fault_id, |f| {
                f.attempts.push(RecoveryAttempt {
                    attempt_number: f.attempts.len() as u32 + 1,
                    strategy_used: action.strategy_id.clone(),
                    action_id: action.id.clone(),
                    started_at: action.started_at,
                    completed_at: action.completed_at,
                    success: action.success,
                    failure_reason: action.failure_reason.clone(),
                });
                f.action_in_flight = false;

                if action.success {
                    return CompletionOutcome::Resolve;
                }
                if f.attempts.len() as u32 >= max_attempts {
                    f.requires_manual = true;
                    return CompletionOutcome::Exhausted(Box::new(f.clone()));
                }
                let auto_allowed = f
                    .plan
                    .as_ref()
                    .is_some_and(|p| should_auto_recover(auto_restart, f, p));
                if !auto_allowed {
                    f.requires_manual = true;
                    return CompletionOutcome::NeedsApproval;
                }
                let (strategy, delay) = next_strategy(f, &catalog);
                let at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                f.next_attempt_at = Some(at);
                CompletionOutcome::Retry { strategy, at }
            })
            .await;

        match outcome {
            None => debug!(
                fault_id = %action.fault_id,
                action_id = %action.id,
                "Action finished for a fault that is no longer active"
            ),
            Some(CompletionOutcome::Resolve) => {
                let resolution = match action.initiator {
                    Initiator::Auto => "auto",
                    Initiator::Manual => "manual",
                };
                if let Err(e) = self.close_fault(&action.fault_id, resolution).await {
                    warn!(fault_id = %action.fault_id, error = %e, "Could not resolve recovered fault");
                }
            }
            Some(CompletionOutcome::Retry { strategy, at }) => info!(
                fault_id = %action.fault_id,
                next_strategy = %strategy,
                not_before = %at,
                "Recovery attempt failed, retry scheduled"
            ),
            Some(CompletionOutcome::NeedsApproval) => info!(
                fault_id = %action.fault_id,
                "Recovery attempt failed, further attempts need approval"
            ),
            Some(CompletionOutcome::Exhausted(fault)) => {
                error!(
                    fault_id = %fault.id,
                    component = %fault.component,
                    attempts = fault.attempts.len(),
                    "Recovery attempts exhausted, manual intervention required"
                );
                let alert = Alert::new(
                    "recovery_exhausted",
                    Severity::Critical,
                    &fault.component,
                    format!(
                        "Fault {} ({}) still active after {} recovery attempt(s)",
                        fault.id,
                        fault.fault_type,
                        fault.attempts.len()
                    ),
                    now,
                )
                .with_metadata("fault_id", fault.id.to_string());
                self.raise_alert(alert).await;
            }
        }
    }

    /// An action that never ran says nothing about its strategy: it is not an
    /// attempt and not an outcome. Automatic actions dropped at shutdown go
    /// back to the retry queue; anything else waits for an operator.
    async fn handle_undispatched(&self, action: RecoveryAction) {
        let now = self.now();
        let requeue = action.status == ActionStatus::Aborted && action.initiator == Initiator::Auto;
        let updated = self
            .inner
            .faults
            .update(&action.fault_id, |f| {
                f.action_in_flight = false;
                if requeue {
                    f.next_attempt_at = Some(now);
                } else {
                    f.requires_manual = true;
                }
            })
            .await;
        if updated.is_none() {
            debug!(
                fault_id = %action.fault_id,
                action_id = %action.id,
                "Undispatched action for a fault that is no longer active"
            );
            return;
        }

        let reason = action.failure_reason.clone().unwrap_or_default();
        if requeue {
            info!(
                fault_id = %action.fault_id,
                action_id = %action.id,
                strategy = %action.strategy_id,
                "Recovery action never ran, fault queued again"
            );
            return;
        }
        warn!(
            fault_id = %action.fault_id,
            action_id = %action.id,
            strategy = %action.strategy_id,
            reason = %reason,
            "Recovery action never ran, fault needs manual recovery"
        );
        if action.status == ActionStatus::Failed {
            let alert = Alert::new(
                "recovery_rejected",
                Severity::High,
                &action.component,
                format!("Recovery for fault {} was not run: {}", action.fault_id, reason),
                now,
            )
            .with_metadata("fault_id", action.fault_id.to_string())
            .with_metadata("strategy", action.strategy_id.clone());
            self.raise_alert(alert).await;
        }
    }

    async fn queue_due_retries(&self) {
        let now = self.now();
        let due = self
            .inner
            .faults
            .filter(|f| {
                f.status == FaultStatus::Recovering
                    && !f.action_in_flight
                    && !f.requires_manual
                    && f.next_attempt_at.is_some_and(|t| t <= now)
            })
            .await;
        for fault in due {
            let strategy = pending_strategy(&fault, &self.inner.catalog);
            if let Err(e) = self
                .start_recovery(&fault.id, strategy, Initiator::Auto, None)
                .await
            {
                debug!(fault_id = %fault.id, error = %e, "Retry not queued");
            }
        }
    }

    async fn remind_pending_approvals(&self) {
        let waiting = self
            .inner
            .faults
            .filter(|f| f.requires_manual && !f.action_in_flight)
            .await;
        if waiting.is_empty() {
            return;
        }
        let mut throttle = self.inner.approval_reminder.lock().await;
        if throttle.should_log() {
            let suppressed = throttle.get_and_reset_suppressed_count();
            warn!(
                waiting = waiting.len(),
                suppressed,
                faults = ?waiting.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
                "Faults awaiting manual recovery"
            );
        }
    }

    async fn close_fault(&self, fault_id: &FaultId, resolution: &str) -> Result<Fault, HealingError> {
        let fault = self.inner.faults.resolve(fault_id, self.now()).await?;
        self.inner.ledger.lock().await.record_resolved(&fault);
        metrics::record_fault_resolved(&fault.component, resolution);

        if let Some(alert_id) = &fault.alert_id {
            if let Err(e) = self.inner.monitor.resolve_alert(alert_id).await {
                debug!(alert_id = %alert_id, error = %e, "Fault alert already evicted");
            }
        }
        Ok(fault)
    }

    pub fn run_circuit_evaluation(&self) -> usize {
        let transitions = self.inner.circuits.evaluate_all();
        for (name, transition) in &transitions {
            debug!(circuit = %name, from = %transition.from, to = %transition.to, "Circuit re-evaluated");
        }
        for snapshot in self.inner.circuits.snapshot() {
            metrics::record_circuit_state(&snapshot.name, snapshot.state);
        }
        transitions.len()
    }

    pub async fn run_metrics_aggregation(&self) -> HealingMetrics {
        let active = self.inner.faults.len().await as u64;
        let uptime = self.inner.monitor.uptime_percentage().await;
        let computed = self.inner.ledger.lock().await.compute(active, uptime, self.now());
        debug!(
            total_faults = computed.total_faults,
            resolution_rate = computed.resolution_rate,
            recovery_success_rate = computed.recovery_success_rate,
            "Healing metrics updated"
        );
        *self.inner.metrics.write().await = computed.clone();
        computed
    }

    async fn raise_alert(&self, alert: Alert) {
        self.inner.monitor.push_alert(alert.clone()).await;
        if let Err(e) = self.inner.alerts.send(&alert).await {
            warn!(alert_id = %alert.id, error = %e, "Alert delivery failed");
        }
    }

    // ---- operator API ----------------------------------------------------

    pub async fn get_status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            enabled: self.inner.config.enabled,
            auto_restart: self.inner.config.auto_restart,
            max_restart_attempts: self.inner.config.max_restart_attempts,
            active_faults: self.inner.faults.len().await,
            component_monitors: self.inner.monitor.component_count(),
            strategies: self.inner.catalog.len(),
            detection_rules: self.inner.detector.rule_count().await,
            circuits: self.inner.circuits.len(),
            recovery_history: self.inner.executor.history_len().await,
            resolved_faults: self.inner.faults.resolved_len().await,
            queued_actions: self.inner.executor.queued_count().await,
            running_actions: self.inner.executor.running_count().await,
            system_health: self.get_system_health().await,
            metrics: self.get_healing_metrics().await,
        }
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        self.inner.monitor.snapshot().await
    }

    /// Snapshot from the last aggregation tick.
    pub async fn get_healing_metrics(&self) -> HealingMetrics {
        self.inner.metrics.read().await.clone()
    }

    pub async fn get_active_faults(&self) -> HashMap<FaultId, Fault> {
        self.inner.faults.snapshot().await
    }

    /// Most recent `limit` resolved faults, oldest first.
    pub async fn get_resolved_faults(&self, limit: usize) -> Vec<Fault> {
        self.inner.faults.resolved(limit).await
    }

    pub async fn get_fault(&self, id: &FaultId) -> Option<Fault> {
        self.inner.faults.get(id).await
    }

    /// Most recent `limit` finished actions, oldest first.
    pub async fn get_recovery_history(&self, limit: usize) -> Vec<RecoveryAction> {
        self.inner.executor.history(limit).await
    }

    /// Actions currently executing, with live progress.
    pub async fn get_running_actions(&self) -> Vec<RecoveryAction> {
        self.inner.executor.running().await
    }

    pub async fn get_component_health(&self, component: &str) -> Option<ComponentHealth> {
        self.inner.monitor.component(component).await
    }

    pub async fn get_detection_history(&self, limit: usize) -> Vec<DetectionRecord> {
        self.inner.detector.history(limit).await
    }

    pub async fn get_component_history(&self, component: &str, limit: usize) -> Vec<HealthSample> {
        self.inner.monitor.component_history(component, limit).await
    }

    /// Run recovery for a fault held for approval, or one whose automatic
    /// attempts are exhausted.
    ///
    /// # Errors
    /// `FaultNotFound`, `NotAwaitingApproval` for faults in any other state,
    /// `MissingPlan` if diagnosis produced no plan.
    pub async fn approve_recovery(&self, fault_id: &FaultId, approver: &str) -> Result<ActionId, HealingError> {
        let fault = self
            .inner
            .faults
            .get(fault_id)
            .await
            .ok_or_else(|| HealingError::FaultNotFound(fault_id.clone()))?;

        let awaiting = match fault.status {
            FaultStatus::DiagnosingCompleted => !fault.action_in_flight,
            FaultStatus::Recovering => fault.requires_manual && !fault.action_in_flight,
            _ => false,
        };
        if !awaiting {
            return Err(HealingError::NotAwaitingApproval(fault.id.clone(), fault.status));
        }
        if fault.plan.is_none() {
            return Err(HealingError::MissingPlan(fault.id.clone()));
        }
        let strategy = pending_strategy(&fault, &self.inner.catalog);

        info!(fault_id = %fault.id, approver, strategy = %strategy, "Recovery approved");
        self.inner
            .faults
            .update(fault_id, |f| f.requires_manual = false)
            .await;
        self.inner.ledger.lock().await.record_manual_intervention();
        self.start_recovery(fault_id, strategy, Initiator::Manual, Some(approver.to_string()))
            .await
    }

    /// Mark a fault RESOLVED by hand.
    pub async fn resolve_fault(&self, fault_id: &FaultId) -> Result<Fault, HealingError> {
        let fault = self.close_fault(fault_id, "manual").await?;
        self.inner.ledger.lock().await.record_manual_intervention();
        info!(fault_id = %fault_id, "Fault resolved manually");
        Ok(fault)
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<Alert, HealingError> {
        self.inner.monitor.acknowledge_alert(alert_id).await
    }

    pub async fn enable_rule(&self, rule_id: &str) -> Result<(), HealingError> {
        self.inner.detector.enable_rule(rule_id).await
    }

    pub async fn disable_rule(&self, rule_id: &str) -> Result<(), HealingError> {
        self.inner.detector.disable_rule(rule_id).await
    }

    pub async fn detection_rules(&self) -> Vec<DetectionRule> {
        self.inner.detector.rules().await
    }

    /// Circuit guarding `dependency`, created on first use.
    pub fn circuit(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.inner.circuits.get_or_create(dependency)
    }

    pub fn circuits(&self) -> Vec<CircuitSnapshot> {
        self.inner.circuits.snapshot()
    }
}

/// Strategy for the fault's next action: the plan's choice until something
/// has been attempted, then whatever escalation picks.
fn pending_strategy(fault: &Fault, catalog: &StrategyCatalog) -> String {
    match &fault.plan {
        Some(plan) if fault.attempts.is_empty() => plan.selected_strategy.clone(),
        _ => next_strategy(fault, catalog).0,
    }
}

/// First untried alternate right away, otherwise the last strategy again after
/// its cooldown.
fn next_strategy(fault: &Fault, catalog: &StrategyCatalog) -> (String, Duration) {
    let tried = fault.tried_strategies();
    if let Some(plan) = &fault.plan {
        if let Some(alternate) = plan
            .alternative_strategies
            .iter()
            .find(|s| !tried.contains(s) && catalog.contains(s))
        {
            return (alternate.clone(), Duration::ZERO);
        }
    }
    let last = fault
        .last_attempt()
        .map(|a| a.strategy_used.clone())
        .or_else(|| fault.plan.as_ref().map(|p| p.selected_strategy.clone()))
        .unwrap_or_default();
    let cooldown = catalog.get(&last).map(|s| s.cooldown()).unwrap_or_default();
    (last, cooldown)
}
