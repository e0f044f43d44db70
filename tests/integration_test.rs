//! End-to-end tests of the healing loop driven tick by tick through the
//! public API, with sandbox collaborators and a manually advanced clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use tokio::sync::mpsc;

use selfheal::alerting::{Alert, ChannelAlertSink};
use selfheal::clock::{Clock, ManualClock};
use selfheal::config::{default_strategies, HealingConfig};
use selfheal::detection::{Comparator, DetectionRule};
use selfheal::diagnosis::{DiagnosisContext, ImpactAssessor, RootCauseAnalyzer, StrategyMapping};
use selfheal::fault::{Fault, FaultId, FaultStatus, ImpactAssessment, ImpactScope, RootCause};
use selfheal::recovery::{
    ActionStatus, FailurePolicy, Initiator, RecoveryAction, RecoveryStep, RecoveryStrategy,
    StepError, StepExecutor, StepKind, StepStatus,
};
use selfheal::resilience::CircuitState;
use selfheal::sandbox::{InMemoryMetricSource, SandboxStepExecutor};
use selfheal::source::MetricSource;
use selfheal::types::{RiskLevel, Severity};
use selfheal::{Collaborators, HealingError, SelfHealingSystem};

// --- Mocks ---

mock! {
    pub Steps {}

    #[async_trait]
    impl StepExecutor for Steps {
        async fn execute(&self, component: &str, step: &RecoveryStep) -> Result<String, StepError>;
    }
}

// --- Fixtures ---

struct Harness {
    system: SelfHealingSystem,
    source: Arc<InMemoryMetricSource>,
    clock: ManualClock,
    alerts: mpsc::UnboundedReceiver<Alert>,
}

impl Harness {
    fn drain_alerts(&mut self) -> Vec<Alert> {
        let mut out = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            out.push(alert);
        }
        out
    }
}

fn rule(
    id: &str,
    component: &str,
    metric: &str,
    comparator: Comparator,
    threshold: f64,
    duration_secs: u64,
    severity: Severity,
) -> DetectionRule {
    DetectionRule {
        id: id.to_string(),
        name: id.to_string(),
        component: component.to_string(),
        metric: metric.to_string(),
        comparator,
        threshold,
        duration_secs,
        severity,
        enabled: true,
        fault_type: None,
        hit_count: 0,
    }
}

fn error_rate_rule(component: &str, duration_secs: u64, severity: Severity) -> DetectionRule {
    rule(
        &format!("{}_error_rate", component),
        component,
        "error_rate",
        Comparator::Gt,
        0.1,
        duration_secs,
        severity,
    )
}

fn config_with_rules(rules: Vec<DetectionRule>) -> HealingConfig {
    let mut config = HealingConfig::default();
    config.rules = rules;
    config.anomaly.enabled = false;
    config
}

fn harness_with(config: HealingConfig, steps: Arc<dyn StepExecutor>) -> Harness {
    let clock = ManualClock::new(Utc::now());
    let source = Arc::new(InMemoryMetricSource::seeded(&config));
    let (sink, alerts) = ChannelAlertSink::new();
    let collaborators = Collaborators::new(
        Arc::clone(&source) as Arc<dyn MetricSource>,
        steps,
        Arc::new(sink),
    )
    .with_clock(Arc::new(clock.clone()) as Arc<dyn Clock>);
    let system = SelfHealingSystem::new(config, collaborators).unwrap();
    Harness {
        system,
        source,
        clock,
        alerts,
    }
}

fn harness(config: HealingConfig, steps: Arc<SandboxStepExecutor>) -> Harness {
    harness_with(config, steps as Arc<dyn StepExecutor>)
}

/// Keep dispatching until `done` holds for the active faults and history.
async fn drive_until<F>(system: &SelfHealingSystem, mut done: F)
where
    F: FnMut(&HashMap<FaultId, Fault>, &[RecoveryAction]) -> bool,
{
    for _ in 0..400 {
        system.run_recovery_dispatch().await;
        let faults = system.get_active_faults().await;
        let history = system.get_recovery_history(1000).await;
        if done(&faults, &history) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("healing loop did not reach the expected state");
}

async fn only_fault(system: &SelfHealingSystem) -> Fault {
    let faults = system.get_active_faults().await;
    assert_eq!(faults.len(), 1, "expected exactly one active fault");
    faults.into_values().next().unwrap()
}

// --- Detection ---

#[tokio::test]
async fn test_rule_fires_once_while_fault_active() {
    let mut h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::High)]),
        Arc::new(SandboxStepExecutor::new()),
    );
    h.source.set_component("api_server", "error_rate", 0.15);

    let first = h.system.run_detection().await;
    assert_eq!(first.len(), 1);
    let fault = h.system.get_fault(&first[0]).await.unwrap();
    assert_eq!(fault.severity, Severity::High);
    assert_eq!(fault.status, FaultStatus::Detected);
    assert_eq!(fault.detection.value, 0.15);

    h.clock.advance(Duration::from_secs(10));
    assert!(h.system.run_detection().await.is_empty());
    assert_eq!(h.system.get_active_faults().await.len(), 1);

    let alerts = h.drain_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].component, "api_server");
    assert_eq!(h.system.get_detection_history(10).await.len(), 1);
}

#[tokio::test]
async fn test_transient_breach_never_raises_fault() {
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 30, Severity::High)]),
        Arc::new(SandboxStepExecutor::new()),
    );

    for _ in 0..4 {
        h.source.set_component("api_server", "error_rate", 0.5);
        assert!(h.system.run_detection().await.is_empty());
        h.clock.advance(Duration::from_secs(20));

        h.source.set_component("api_server", "error_rate", 0.01);
        assert!(h.system.run_detection().await.is_empty());
        h.clock.advance(Duration::from_secs(20));
    }
    assert!(h.system.get_active_faults().await.is_empty());
}

#[tokio::test]
async fn test_sustained_breach_raises_fault_after_duration() {
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 30, Severity::High)]),
        Arc::new(SandboxStepExecutor::new()),
    );
    h.source.set_component("api_server", "error_rate", 0.5);
    let onset = h.clock.now();

    assert!(h.system.run_detection().await.is_empty());
    h.clock.advance(Duration::from_secs(15));
    assert!(h.system.run_detection().await.is_empty());
    h.clock.advance(Duration::from_secs(15));

    let ids = h.system.run_detection().await;
    assert_eq!(ids.len(), 1);
    let fault = h.system.get_fault(&ids[0]).await.unwrap();
    assert_eq!(fault.detection.breach_started_at, onset);
}

#[tokio::test]
async fn test_missing_metric_is_skipped_not_fatal() {
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::High)]),
        Arc::new(SandboxStepExecutor::new()),
    );
    h.source.remove("api_server.error_rate");
    assert!(h.system.run_detection().await.is_empty());

    h.source.set_component("api_server", "error_rate", 0.3);
    assert_eq!(h.system.run_detection().await.len(), 1);
}

#[tokio::test]
async fn test_disabled_rule_does_not_fire() {
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::High)]),
        Arc::new(SandboxStepExecutor::new()),
    );
    h.source.set_component("api_server", "error_rate", 0.3);

    h.system.disable_rule("api_server_error_rate").await.unwrap();
    assert!(h.system.run_detection().await.is_empty());
    assert!(matches!(
        h.system.disable_rule("nope").await,
        Err(HealingError::RuleNotFound(_))
    ));

    h.system.enable_rule("api_server_error_rate").await.unwrap();
    assert_eq!(h.system.run_detection().await.len(), 1);
}

// --- Diagnosis and automatic recovery ---

#[tokio::test]
async fn test_high_fault_recovers_automatically() {
    let steps = Arc::new(SandboxStepExecutor::new());
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::High)]),
        Arc::clone(&steps),
    );
    h.source.set_component("api_server", "error_rate", 0.15);

    h.system.run_detection().await;
    assert_eq!(h.system.run_diagnosis().await, 1);

    let fault = only_fault(&h.system).await;
    assert_eq!(fault.status, FaultStatus::Recovering);
    let plan = fault.plan.unwrap();
    assert_eq!(plan.selected_strategy, "restart_service");
    assert!(!plan.approval_required);
    assert_eq!(h.system.run_diagnosis().await, 0);

    drive_until(&h.system, |faults, _| faults.is_empty()).await;

    let history = h.system.get_recovery_history(10).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].initiator, Initiator::Auto);
    assert_eq!(steps.call_count("start_service").await, 1);

    let archived = h.system.get_resolved_faults(10).await;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, fault.id);
    assert_eq!(archived[0].status, FaultStatus::Resolved);
    assert_eq!(archived[0].attempts.len(), 1);
    assert!(archived[0].attempts[0].success);

    let metrics = h.system.run_metrics_aggregation().await;
    assert_eq!(metrics.total_faults, 1);
    assert_eq!(metrics.resolved_faults, 1);
    assert_eq!(metrics.resolution_rate, 1.0);
    assert_eq!(metrics.recovery_success_rate, 1.0);
    assert_eq!(metrics.automation_rate, 1.0);
    assert_eq!(h.system.get_healing_metrics().await, metrics);
}

#[tokio::test]
async fn test_critical_fault_waits_for_approval() {
    let steps = Arc::new(SandboxStepExecutor::new());
    let mut h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::Critical)]),
        Arc::clone(&steps),
    );
    h.source.set_component("api_server", "error_rate", 0.9);

    h.system.run_detection().await;
    h.system.run_diagnosis().await;
    h.system.run_recovery_dispatch().await;

    let fault = only_fault(&h.system).await;
    assert_eq!(fault.status, FaultStatus::DiagnosingCompleted);
    assert!(fault.requires_manual);
    assert!(fault.plan.is_some());
    let status = h.system.get_status().await;
    assert_eq!(status.queued_actions + status.running_actions, 0);
    assert!(steps.calls().await.is_empty());

    let alerts = h.drain_alerts();
    assert!(alerts
        .iter()
        .any(|a| a.alert_type == "recovery_approval_required" && a.severity == Severity::Critical));
    let health = h.system.get_system_health().await;
    assert!(!health.critical_alerts.is_empty());

    let action_id = h.system.approve_recovery(&fault.id, "oncall").await.unwrap();
    assert!(matches!(
        h.system.approve_recovery(&fault.id, "oncall").await,
        Err(HealingError::NotAwaitingApproval(_, FaultStatus::Recovering))
    ));

    drive_until(&h.system, |faults, _| faults.is_empty()).await;
    let history = h.system.get_recovery_history(10).await;
    assert_eq!(history[0].id, action_id);
    assert_eq!(history[0].initiator, Initiator::Manual);
    assert_eq!(history[0].approved_by.as_deref(), Some("oncall"));

    let metrics = h.system.run_metrics_aggregation().await;
    assert_eq!(metrics.manual_interventions, 1);
    assert_eq!(metrics.automation_rate, 0.0);
}

#[tokio::test]
async fn test_auto_restart_disabled_holds_every_fault() {
    let mut config = config_with_rules(vec![error_rate_rule("redis", 0, Severity::Low)]);
    config.auto_restart = false;
    let h = harness(config, Arc::new(SandboxStepExecutor::new()));
    h.source.set_component("redis", "error_rate", 0.5);

    h.system.run_detection().await;
    h.system.run_diagnosis().await;
    let fault = only_fault(&h.system).await;
    assert_eq!(fault.status, FaultStatus::DiagnosingCompleted);
    assert!(fault.requires_manual);
}

#[tokio::test]
async fn test_approval_required_strategy_is_never_auto_run() {
    let mut config = config_with_rules(vec![error_rate_rule("redis", 0, Severity::Low)]);
    for strategy in config.strategies.iter_mut() {
        if strategy.id == "restart_service" {
            strategy.requires_approval = true;
        }
    }
    let h = harness(config, Arc::new(SandboxStepExecutor::new()));
    h.source.set_component("redis", "error_rate", 0.5);

    h.system.run_detection().await;
    h.system.run_diagnosis().await;
    let fault = only_fault(&h.system).await;
    assert!(fault.plan.unwrap().approval_required);
    assert_eq!(fault.status, FaultStatus::DiagnosingCompleted);
}

#[tokio::test]
async fn test_manual_resolve_closes_fault() {
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::Critical)]),
        Arc::new(SandboxStepExecutor::new()),
    );
    h.source.set_component("api_server", "error_rate", 0.9);
    h.system.run_detection().await;
    h.system.run_diagnosis().await;
    let fault = only_fault(&h.system).await;

    let resolved = h.system.resolve_fault(&fault.id).await.unwrap();
    assert_eq!(resolved.status, FaultStatus::Resolved);
    assert!(h.system.get_active_faults().await.is_empty());
    assert!(matches!(
        h.system.resolve_fault(&fault.id).await,
        Err(HealingError::FaultNotFound(_))
    ));

    let archived = h.system.get_resolved_faults(10).await;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, fault.id);
    assert!(archived[0].attempts.is_empty());
    assert!(archived[0].plan.is_some());
    assert_eq!(h.system.get_status().await.resolved_faults, 1);

    let health = h.system.get_system_health().await;
    assert!(health.open_alerts().all(|a| a.component != "api_server" || a.alert_type != fault.fault_type));
    assert_eq!(h.system.run_metrics_aggregation().await.manual_interventions, 1);
}

// --- Escalation ---

#[tokio::test]
async fn test_failed_restart_escalates_to_circuit_trip() {
    let steps = Arc::new(SandboxStepExecutor::new());
    steps.fail_always("start_service");
    let h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::High)]),
        Arc::clone(&steps),
    );
    h.source.set_component("api_server", "error_rate", 0.15);
    h.system.run_detection().await;
    h.system.run_diagnosis().await;

    let mut seen = Vec::new();
    drive_until(&h.system, |faults, _| {
        if let Some(f) = faults.values().next() {
            seen.push(f.status);
        }
        faults.is_empty()
    })
    .await;
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));

    let history = h.system.get_recovery_history(10).await;
    let strategies: Vec<&str> = history.iter().map(|a| a.strategy_id.as_str()).collect();
    assert_eq!(strategies, vec!["restart_service", "circuit_breaker_trip"]);
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(history[1].success);

    assert_eq!(h.system.circuit("api_server").state(), CircuitState::Open);
    assert_eq!(h.system.knowledge().stats("api_server_error_rate", "restart_service").await.unwrap().attempts, 1);
}

#[tokio::test]
async fn test_exhausted_attempts_need_manual_intervention() {
    let steps = Arc::new(SandboxStepExecutor::new());
    steps.fail_always("start_service");
    steps.fail_always("trip_circuit");
    let mut h = harness(
        config_with_rules(vec![error_rate_rule("api_server", 0, Severity::High)]),
        Arc::clone(&steps),
    );
    h.source.set_component("api_server", "error_rate", 0.15);
    h.system.run_detection().await;
    h.system.run_diagnosis().await;

    drive_until(&h.system, |_, history| history.len() == 2).await;
    h.system.process_completions().await;
    let fault = only_fault(&h.system).await;
    assert!(fault.next_attempt_at.is_some());
    assert!(!fault.requires_manual);

    // The repeat of the last strategy waits out its cooldown.
    h.system.run_recovery_dispatch().await;
    assert_eq!(h.system.get_recovery_history(10).await.len(), 2);
    h.clock.advance(Duration::from_secs(61));

    drive_until(&h.system, |faults, history| {
        history.len() == 3 && faults.values().all(|f| f.requires_manual)
    })
    .await;

    let fault = only_fault(&h.system).await;
    assert_eq!(fault.status, FaultStatus::Recovering);
    assert_eq!(fault.attempts.len(), 3);
    assert!(h
        .drain_alerts()
        .iter()
        .any(|a| a.alert_type == "recovery_exhausted" && a.severity == Severity::Critical));

    steps.clear_failures();
    h.system.approve_recovery(&fault.id, "oncall").await.unwrap();
    drive_until(&h.system, |faults, _| faults.is_empty()).await;
}

// --- Recovery executor through the loop ---

fn three_step_config() -> HealingConfig {
    let step = |id: &str, on_failure| RecoveryStep {
        id: id.to_string(),
        name: id.to_string(),
        kind: StepKind::ApiCall,
        payload: format!("POST /{}", id),
        parameters: HashMap::new(),
        timeout_secs: 5,
        on_failure,
    };
    let mut config = config_with_rules(vec![error_rate_rule("redis", 0, Severity::Medium)]);
    let mut strategies = default_strategies();
    strategies.push(RecoveryStrategy {
        id: "flush_and_restart".to_string(),
        name: "Flush and Restart".to_string(),
        description: String::new(),
        applicable_components: vec!["redis".to_string()],
        steps: vec![
            step("step1", FailurePolicy::Continue),
            step("step2", FailurePolicy::Abort),
            step("step3", FailurePolicy::Abort),
        ],
        success_threshold: 0.5,
        timeout_secs: 60,
        max_retries: 0,
        cooldown_secs: 0,
        risk_level: RiskLevel::Low,
        requires_approval: false,
    });
    config.strategies = strategies;
    config.strategy_table.push(StrategyMapping {
        component: "redis".to_string(),
        fault_type: None,
        strategy: "flush_and_restart".to_string(),
        alternates: vec![],
    });
    config.default_alternates = vec![];
    config.max_restart_attempts = 1;
    config
}

#[tokio::test]
async fn test_abort_step_stops_strategy() {
    let mut mock = MockSteps::new();
    mock.expect_execute()
        .withf(|_, step| step.id == "step1")
        .times(1)
        .returning(|_, _| Ok("flushed".to_string()));
    mock.expect_execute()
        .withf(|_, step| step.id == "step2")
        .times(1)
        .returning(|_, _| Err(StepError::Failed("restart refused".to_string())));
    mock.expect_execute()
        .withf(|_, step| step.id == "step3")
        .never();

    let h = harness_with(three_step_config(), Arc::new(mock));
    h.source.set_component("redis", "error_rate", 0.5);
    h.system.run_detection().await;
    h.system.run_diagnosis().await;

    drive_until(&h.system, |_, history| !history.is_empty()).await;
    let action = &h.system.get_recovery_history(1).await[0];
    assert_eq!(action.strategy_id, "flush_and_restart");
    assert!(!action.success);
    let log: Vec<(&str, StepStatus)> = action
        .steps
        .iter()
        .map(|s| (s.step_id.as_str(), s.status))
        .collect();
    assert_eq!(log, vec![("step1", StepStatus::Completed), ("step2", StepStatus::Failed)]);
}

#[tokio::test]
async fn test_running_actions_never_exceed_pool() {
    let components = ["api_server", "database", "redis", "strategy_engine"];
    let mut config = config_with_rules(
        components
            .iter()
            .map(|c| error_rate_rule(c, 0, Severity::Medium))
            .collect(),
    );
    config.max_concurrent_actions = 2;
    let steps = Arc::new(SandboxStepExecutor::new().with_delay(Duration::from_millis(20)));
    let h = harness(config, Arc::clone(&steps));
    for c in components {
        h.source.set_component(c, "error_rate", 0.5);
    }

    assert_eq!(h.system.run_detection().await.len(), 4);
    h.system.run_diagnosis().await;
    h.system.run_recovery_dispatch().await;

    let status = h.system.get_status().await;
    assert_eq!(status.running_actions, 2);
    assert_eq!(status.queued_actions, 2);

    let mut peak = 0;
    for _ in 0..400 {
        h.system.run_recovery_dispatch().await;
        let status = h.system.get_status().await;
        peak = peak.max(status.running_actions);
        assert!(status.running_actions <= 2);
        if status.active_faults == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(peak, 2);
    assert!(h.system.get_active_faults().await.is_empty());
    assert_eq!(h.system.get_recovery_history(100).await.len(), 4);
}

#[tokio::test]
async fn test_recovery_history_limit_keeps_latest() {
    let components = ["api_server", "database", "redis"];
    let config = config_with_rules(
        components
            .iter()
            .map(|c| error_rate_rule(c, 0, Severity::Medium))
            .collect(),
    );
    let h = harness(config, Arc::new(SandboxStepExecutor::new()));
    for c in components {
        h.source.set_component(c, "error_rate", 0.5);
    }
    h.system.run_detection().await;
    h.system.run_diagnosis().await;
    drive_until(&h.system, |faults, _| faults.is_empty()).await;

    let all = h.system.get_recovery_history(100).await;
    assert_eq!(all.len(), 3);
    let last_two = h.system.get_recovery_history(2).await;
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[0].id, all[1].id);
    assert_eq!(last_two[1].id, all[2].id);
}

// --- Lifecycle ---

#[tokio::test]
async fn test_start_stop_lifecycle() {
    let h = harness(
        config_with_rules(vec![]),
        Arc::new(SandboxStepExecutor::new()),
    );
    assert!(matches!(h.system.stop().await, Err(HealingError::NotRunning)));

    h.system.start().await.unwrap();
    assert!(h.system.is_running());
    assert!(matches!(h.system.start().await, Err(HealingError::AlreadyRunning)));

    h.system.stop().await.unwrap();
    assert!(!h.system.is_running());
    assert!(matches!(h.system.stop().await, Err(HealingError::NotRunning)));
}

#[tokio::test]
async fn test_disabled_system_refuses_to_start() {
    let mut config = config_with_rules(vec![]);
    config.enabled = false;
    let h = harness(config, Arc::new(SandboxStepExecutor::new()));
    assert!(matches!(h.system.start().await, Err(HealingError::Disabled)));
    assert!(!h.system.get_status().await.enabled);
}

#[tokio::test]
async fn test_stop_waits_for_running_and_aborts_queued() {
    let mut config = config_with_rules(vec![
        error_rate_rule("api_server", 0, Severity::Medium),
        error_rate_rule("redis", 0, Severity::Medium),
    ]);
    config.max_concurrent_actions = 1;
    let steps = Arc::new(SandboxStepExecutor::new().with_delay(Duration::from_millis(100)));
    let h = harness(config, steps);
    h.source.set_component("api_server", "error_rate", 0.5);
    h.source.set_component("redis", "error_rate", 0.5);

    h.system.start().await.unwrap();
    for _ in 0..200 {
        h.system.run_detection().await;
        h.system.run_diagnosis().await;
        h.system.run_recovery_dispatch().await;
        let status = h.system.get_status().await;
        if status.running_actions == 1 && status.queued_actions == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let running = h.system.get_running_actions().await;
    assert_eq!(running.len(), 1);
    assert!(running[0].dispatched);

    h.system.stop().await.unwrap();

    let status = h.system.get_status().await;
    assert_eq!(status.running_actions, 0);
    assert_eq!(status.queued_actions, 0);
    assert!(h.system.get_running_actions().await.is_empty());
    let history = h.system.get_recovery_history(10).await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.status.is_terminal()));
    assert!(history.iter().any(|a| a.status == ActionStatus::Completed));
    assert!(history.iter().any(|a| {
        a.status == ActionStatus::Aborted
            && a.failure_reason.as_deref() == Some("shut down before dispatch")
    }));
}

#[tokio::test]
async fn test_actions_dropped_at_shutdown_are_not_outcomes() {
    let mut config = config_with_rules(vec![
        error_rate_rule("api_server", 0, Severity::Medium),
        error_rate_rule("redis", 0, Severity::Medium),
    ]);
    config.max_concurrent_actions = 1;
    let steps = Arc::new(SandboxStepExecutor::new().with_delay(Duration::from_millis(50)));
    let h = harness(config, Arc::clone(&steps));
    h.source.set_component("api_server", "error_rate", 0.5);
    h.source.set_component("redis", "error_rate", 0.5);

    h.system.start().await.unwrap();
    h.system.run_detection().await;
    h.system.run_diagnosis().await;
    for _ in 0..200 {
        h.system.run_recovery_dispatch().await;
        let status = h.system.get_status().await;
        if status.running_actions == 1 && status.queued_actions == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    h.system.stop().await.unwrap();

    let history = h.system.get_recovery_history(10).await;
    let dropped = history
        .iter()
        .find(|a| a.status == ActionStatus::Aborted)
        .expect("one action never left the queue");
    assert!(!dropped.dispatched);

    // Never ran: no attempt, no knowledge, no failed recovery
    let fault = h.system.get_fault(&dropped.fault_id).await.unwrap();
    assert_eq!(fault.status, FaultStatus::Recovering);
    assert!(fault.attempts.is_empty());
    assert!(!fault.action_in_flight);
    assert!(!fault.requires_manual);
    assert!(h
        .system
        .knowledge()
        .stats(&dropped.fault_type, &dropped.strategy_id)
        .await
        .is_none());
    let metrics = h.system.run_metrics_aggregation().await;
    assert_eq!(metrics.total_recovery_actions, 1);
    assert_eq!(metrics.failed_recoveries, 0);
    assert_eq!(metrics.recovery_success_rate, 1.0);

    // The plan's own strategy runs on the next dispatch
    drive_until(&h.system, |faults, _| faults.is_empty()).await;
    let rerun = h.system.get_recovery_history(10).await;
    let last = rerun.last().unwrap();
    assert_eq!(last.fault_id, dropped.fault_id);
    assert_eq!(last.strategy_id, fault.plan.unwrap().selected_strategy);
    assert!(last.success);
    assert_eq!(h.system.get_resolved_faults(10).await.len(), 2);
}

// --- Circuits and health ---

#[tokio::test]
async fn test_circuit_opens_and_half_opens_on_schedule() {
    let h = harness(
        config_with_rules(vec![]),
        Arc::new(SandboxStepExecutor::new()),
    );
    let circuit = h.system.circuit("exchange_api");

    for _ in 0..4 {
        circuit.record_failure();
    }
    assert_eq!(circuit.state(), CircuitState::Closed);
    circuit.record_failure();
    assert_eq!(circuit.state(), CircuitState::Open);

    h.clock.advance(Duration::from_secs(59));
    assert_eq!(h.system.run_circuit_evaluation(), 0);
    assert_eq!(circuit.state(), CircuitState::Open);

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.system.run_circuit_evaluation(), 1);
    assert_eq!(circuit.state(), CircuitState::HalfOpen);
    assert_eq!(circuit.failure_count(), 0);
    assert_eq!(circuit.success_count(), 0);
    assert_eq!(h.system.circuits().len(), 1);
}

#[tokio::test]
async fn test_health_check_reflects_metrics() {
    let h = harness(
        config_with_rules(vec![]),
        Arc::new(SandboxStepExecutor::new()),
    );
    let healthy = h.system.run_health_check().await;
    assert_eq!(healthy.components.len(), 5);
    assert!(healthy.overall_score > 0.9);

    h.source.set_component("database", "response_time", 5000.0);
    h.source.set_component("database", "error_rate", 0.5);
    let degraded = h.system.run_health_check().await;
    assert!(degraded.overall_score < healthy.overall_score);
    assert_eq!(degraded.components["database"].score, 0.25);
    let database = h.system.get_component_health("database").await.unwrap();
    assert_eq!(database.score, 0.25);
    assert_eq!(database.last_check, h.clock.now());
    assert!(h.system.get_component_health("unknown").await.is_none());
    assert_eq!(h.system.get_component_history("database", 10).await.len(), 2);
}

#[tokio::test]
async fn test_status_reports_counts() {
    let h = harness(HealingConfig::default(), Arc::new(SandboxStepExecutor::new()));
    let status = h.system.get_status().await;
    assert!(!status.running);
    assert!(status.enabled);
    assert!(status.auto_restart);
    assert_eq!(status.max_restart_attempts, 3);
    assert_eq!(status.component_monitors, 5);
    assert_eq!(status.strategies, 3);
    assert_eq!(status.detection_rules, 4);
    assert_eq!(status.active_faults, 0);
    assert_eq!(status.metrics.resolution_rate, 0.0);
}

// --- Pluggable scoring ---

struct OperatorRunbook;

impl RootCauseAnalyzer for OperatorRunbook {
    fn analyze(&self, ctx: &DiagnosisContext<'_>) -> RootCause {
        RootCause {
            cause_type: "connection_pool_exhausted".to_string(),
            component: ctx.fault.component.clone(),
            reason: "pool saturated per runbook".to_string(),
            confidence: 0.95,
            evidence: vec![],
            related_faults: vec![],
        }
    }
}

struct FixedImpact;

impl ImpactAssessor for FixedImpact {
    fn assess(
        &self,
        fault: &Fault,
        _dependents: &[String],
        _historical_recovery_time: Option<Duration>,
    ) -> ImpactAssessment {
        ImpactAssessment {
            scope: ImpactScope::Component,
            severity: fault.severity,
            affected_components: vec![fault.component.clone()],
            business_impact: "order entry latency".to_string(),
            recovery_time_estimate: Duration::from_secs(42),
        }
    }
}

#[tokio::test]
async fn test_injected_scoring_drives_diagnosis() {
    let mut config = config_with_rules(vec![error_rate_rule("database", 0, Severity::High)]);
    config.auto_restart = false;
    let source = Arc::new(InMemoryMetricSource::seeded(&config));
    let (sink, _alerts) = ChannelAlertSink::new();
    let collaborators = Collaborators::new(
        Arc::clone(&source) as Arc<dyn MetricSource>,
        Arc::new(SandboxStepExecutor::new()),
        Arc::new(sink),
    )
    .with_root_cause_analyzer(Arc::new(OperatorRunbook))
    .with_impact_assessor(Arc::new(FixedImpact));
    let system = SelfHealingSystem::new(config, collaborators).unwrap();

    source.set_component("database", "error_rate", 0.4);
    system.run_detection().await;
    assert_eq!(system.run_diagnosis().await, 1);

    let fault = only_fault(&system).await;
    let root_cause = fault.root_cause.unwrap();
    assert_eq!(root_cause.cause_type, "connection_pool_exhausted");
    assert_eq!(root_cause.confidence, 0.95);
    let impact = fault.impact.unwrap();
    assert_eq!(impact.business_impact, "order entry latency");
    assert_eq!(impact.recovery_time_estimate, Duration::from_secs(42));
    assert_eq!(fault.plan.unwrap().confidence, 0.95);
}
