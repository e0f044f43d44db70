//! Configuration for the self-healing system.
//!
//! Loaded from JSON, every field optional with the defaults below, then
//! overridable from the environment.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::anomaly::AnomalyConfig;
use crate::detection::rule::{Comparator, DetectionRule};
use crate::diagnosis::correlation::{CorrelationRule, EventPattern};
use crate::diagnosis::engine::StrategyMapping;
use crate::monitor::component::{ComponentConfig, MetricThreshold};
use crate::recovery::strategy::{FailurePolicy, RecoveryStep, RecoveryStrategy, StepKind};
use crate::resilience::CircuitConfig;
use crate::types::{RiskLevel, Severity};

pub const ENV_AUTO_RESTART: &str = "SELFHEAL_AUTO_RESTART";
pub const ENV_MAX_CONCURRENT_ACTIONS: &str = "SELFHEAL_MAX_CONCURRENT_ACTIONS";
pub const ENV_MAX_RESTART_ATTEMPTS: &str = "SELFHEAL_MAX_RESTART_ATTEMPTS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid environment value {name}={value}")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allow recovery to start without operator approval
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Automatic recovery attempts per fault before manual intervention is required
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_detection_interval")]
    pub detection_interval_secs: u64,

    #[serde(default = "default_diagnosis_interval")]
    pub diagnosis_interval_secs: u64,

    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_ms: u64,

    #[serde(default = "default_circuit_interval")]
    pub circuit_interval_secs: u64,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Upper bound on RUNNING recovery actions
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,

    #[serde(default = "default_history_cap")]
    pub health_history_cap: usize,

    #[serde(default = "default_history_cap")]
    pub recovery_history_cap: usize,

    #[serde(default = "default_history_cap")]
    pub detection_history_cap: usize,

    /// Per-list cap for critical and warning alerts on the health snapshot
    #[serde(default = "default_alert_cap")]
    pub alert_cap: usize,

    #[serde(default = "default_correlation_window")]
    pub correlation_window_secs: u64,

    /// Root causes below this confidence are reported as best effort
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Default circuit settings
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Per-dependency circuit overrides
    #[serde(default)]
    pub circuits: HashMap<String, CircuitConfig>,

    #[serde(default = "default_components")]
    pub components: Vec<ComponentConfig>,

    #[serde(default = "default_rules")]
    pub rules: Vec<DetectionRule>,

    #[serde(default = "default_strategies")]
    pub strategies: Vec<RecoveryStrategy>,

    #[serde(default = "default_strategy_table")]
    pub strategy_table: Vec<StrategyMapping>,

    #[serde(default = "default_strategy_id")]
    pub default_strategy: String,

    #[serde(default = "default_alternates")]
    pub default_alternates: Vec<String>,

    #[serde(default = "default_correlation_rules")]
    pub correlation_rules: Vec<CorrelationRule>,
}

fn default_true() -> bool {
    true
}
fn default_max_restart_attempts() -> u32 {
    3
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_detection_interval() -> u64 {
    10
}
fn default_diagnosis_interval() -> u64 {
    5
}
fn default_recovery_interval() -> u64 {
    1000
}
fn default_circuit_interval() -> u64 {
    5
}
fn default_metrics_interval() -> u64 {
    30
}
fn default_max_concurrent_actions() -> usize {
    3
}
fn default_history_cap() -> usize {
    1000
}
fn default_alert_cap() -> usize {
    100
}
fn default_correlation_window() -> u64 {
    300
}
fn default_confidence_floor() -> f64 {
    0.5
}
fn default_strategy_id() -> String {
    "restart_service".to_string()
}
fn default_alternates() -> Vec<String> {
    vec!["circuit_breaker_trip".to_string()]
}

fn threshold(metric: &str, warning: f64, critical: f64, higher_is_worse: bool) -> MetricThreshold {
    MetricThreshold {
        metric: metric.to_string(),
        warning,
        critical,
        higher_is_worse,
    }
}

fn component(name: &str, dependencies: &[&str]) -> ComponentConfig {
    ComponentConfig {
        name: name.to_string(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        thresholds: vec![
            threshold("response_time", 500.0, 2000.0, true),
            threshold("error_rate", 0.05, 0.20, true),
        ],
        check_timeout_ms: 5000,
    }
}

pub fn default_components() -> Vec<ComponentConfig> {
    vec![
        component("api_server", &["database", "redis"]),
        component("database", &[]),
        component("redis", &[]),
        component("exchange_connector", &[]),
        component("strategy_engine", &["exchange_connector", "database"]),
    ]
}

#[allow(clippy::too_many_arguments)]
fn rule(
    id: &str,
    name: &str,
    component: &str,
    metric: &str,
    comparator: Comparator,
    threshold: f64,
    duration_secs: u64,
    severity: Severity,
) -> DetectionRule {
    DetectionRule {
        id: id.to_string(),
        name: name.to_string(),
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

pub fn default_rules() -> Vec<DetectionRule> {
    vec![
        rule(
            "high_response_time",
            "High Response Time",
            "api_server",
            "response_time",
            Comparator::Gt,
            2000.0,
            60,
            Severity::High,
        ),
        rule(
            "high_error_rate",
            "High Error Rate",
            "api_server",
            "error_rate",
            Comparator::Gt,
            0.1,
            30,
            Severity::Critical,
        ),
        rule(
            "database_connection_failure",
            "Database Connection Failure",
            "database",
            "connection_success",
            Comparator::Lt,
            0.5,
            60,
            Severity::Critical,
        ),
        rule(
            "exchange_api_timeout",
            "Exchange API Timeout",
            "exchange_connector",
            "api_timeout_rate",
            Comparator::Gt,
            0.2,
            120,
            Severity::High,
        ),
    ]
}

fn step(
    id: &str,
    name: &str,
    kind: StepKind,
    payload: &str,
    timeout_secs: u64,
    on_failure: FailurePolicy,
) -> RecoveryStep {
    RecoveryStep {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        payload: payload.to_string(),
        parameters: HashMap::new(),
        timeout_secs,
        on_failure,
    }
}

pub fn default_strategies() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy {
            id: "restart_service".to_string(),
            name: "Restart Service".to_string(),
            description: "Stop and start the failing service, then verify it answers".to_string(),
            applicable_components: vec![
                "api_server".to_string(),
                "strategy_engine".to_string(),
                "redis".to_string(),
                "database".to_string(),
            ],
            steps: vec![
                step(
                    "stop_service",
                    "Stop Service",
                    StepKind::Command,
                    "systemctl stop {component}",
                    30,
                    FailurePolicy::Continue,
                ),
                step(
                    "start_service",
                    "Start Service",
                    StepKind::Command,
                    "systemctl start {component}",
                    60,
                    FailurePolicy::Abort,
                ),
                step(
                    "verify_service",
                    "Verify Service",
                    StepKind::ApiCall,
                    "GET /health",
                    30,
                    FailurePolicy::Retry,
                ),
            ],
            success_threshold: 0.8,
            timeout_secs: 300,
            max_retries: 3,
            cooldown_secs: 600,
            risk_level: RiskLevel::Medium,
            requires_approval: false,
        },
        RecoveryStrategy {
            id: "failover_exchange".to_string(),
            name: "Exchange Failover".to_string(),
            description: "Route exchange traffic to the backup connection".to_string(),
            applicable_components: vec!["exchange_connector".to_string()],
            steps: vec![
                step(
                    "disable_primary",
                    "Disable Primary Exchange",
                    StepKind::ConfigChange,
                    "exchange.primary.enabled=false",
                    10,
                    FailurePolicy::Abort,
                ),
                step(
                    "enable_backup",
                    "Enable Backup Exchange",
                    StepKind::ConfigChange,
                    "exchange.backup.enabled=true",
                    10,
                    FailurePolicy::Abort,
                ),
            ],
            success_threshold: 0.9,
            timeout_secs: 120,
            max_retries: 2,
            cooldown_secs: 300,
            risk_level: RiskLevel::Low,
            requires_approval: false,
        },
        RecoveryStrategy {
            id: "circuit_breaker_trip".to_string(),
            name: "Trip Circuit Breaker".to_string(),
            description: "Isolate the failing dependency behind an open circuit".to_string(),
            applicable_components: vec!["*".to_string()],
            steps: vec![step(
                "trip_circuit",
                "Trip Circuit",
                StepKind::ApiCall,
                "POST /circuit-breaker/trip",
                5,
                FailurePolicy::Retry,
            )],
            success_threshold: 1.0,
            timeout_secs: 30,
            max_retries: 1,
            cooldown_secs: 60,
            risk_level: RiskLevel::Low,
            requires_approval: false,
        },
    ]
}

pub fn default_strategy_table() -> Vec<StrategyMapping> {
    vec![
        StrategyMapping {
            component: "api_server".to_string(),
            fault_type: None,
            strategy: "restart_service".to_string(),
            alternates: vec!["circuit_breaker_trip".to_string()],
        },
        StrategyMapping {
            component: "exchange_connector".to_string(),
            fault_type: None,
            strategy: "failover_exchange".to_string(),
            alternates: vec!["circuit_breaker_trip".to_string()],
        },
    ]
}

pub fn default_correlation_rules() -> Vec<CorrelationRule> {
    vec![
        CorrelationRule {
            id: "database_to_api".to_string(),
            name: "Database degradation cascades into API".to_string(),
            cause: EventPattern::component("database"),
            effect: EventPattern::component("api_server"),
            within_secs: 120,
            strength: 0.8,
            enabled: true,
        },
        CorrelationRule {
            id: "redis_to_api".to_string(),
            name: "Cache degradation cascades into API".to_string(),
            cause: EventPattern::component("redis"),
            effect: EventPattern::component("api_server"),
            within_secs: 60,
            strength: 0.6,
            enabled: true,
        },
        CorrelationRule {
            id: "exchange_to_strategy".to_string(),
            name: "Exchange connectivity stalls strategy engine".to_string(),
            cause: EventPattern::component("exchange_connector"),
            effect: EventPattern::component("strategy_engine"),
            within_secs: 120,
            strength: 0.7,
            enabled: true,
        },
    ]
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_restart: true,
            max_restart_attempts: default_max_restart_attempts(),
            health_check_interval_secs: default_health_check_interval(),
            detection_interval_secs: default_detection_interval(),
            diagnosis_interval_secs: default_diagnosis_interval(),
            recovery_interval_ms: default_recovery_interval(),
            circuit_interval_secs: default_circuit_interval(),
            metrics_interval_secs: default_metrics_interval(),
            max_concurrent_actions: default_max_concurrent_actions(),
            health_history_cap: default_history_cap(),
            recovery_history_cap: default_history_cap(),
            detection_history_cap: default_history_cap(),
            alert_cap: default_alert_cap(),
            correlation_window_secs: default_correlation_window(),
            confidence_floor: default_confidence_floor(),
            anomaly: AnomalyConfig::default(),
            circuit: CircuitConfig::default(),
            circuits: HashMap::new(),
            components: default_components(),
            rules: default_rules(),
            strategies: default_strategies(),
            strategy_table: default_strategy_table(),
            default_strategy: default_strategy_id(),
            default_alternates: default_alternates(),
            correlation_rules: default_correlation_rules(),
        }
    }
}

impl HealingConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: HealingConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply `SELFHEAL_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_AUTO_RESTART) {
            self.auto_restart = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid_env(ENV_AUTO_RESTART, &value)),
            };
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_ACTIONS) {
            self.max_concurrent_actions = value
                .trim()
                .parse()
                .map_err(|_| invalid_env(ENV_MAX_CONCURRENT_ACTIONS, &value))?;
        }
        if let Some(value) = lookup(ENV_MAX_RESTART_ATTEMPTS) {
            self.max_restart_attempts = value
                .trim()
                .parse()
                .map_err(|_| invalid_env(ENV_MAX_RESTART_ATTEMPTS, &value))?;
        }
        Ok(())
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("detection_interval_secs", self.detection_interval_secs),
            ("diagnosis_interval_secs", self.diagnosis_interval_secs),
            ("recovery_interval_ms", self.recovery_interval_ms),
            ("circuit_interval_secs", self.circuit_interval_secs),
            ("metrics_interval_secs", self.metrics_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }

        if self.max_concurrent_actions == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_actions must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ConfigError::Invalid(format!(
                "confidence_floor must be within [0, 1], got {}",
                self.confidence_floor
            )));
        }

        self.circuit.validate().map_err(ConfigError::Invalid)?;
        for (name, circuit) in &self.circuits {
            circuit
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("circuit {}: {}", name, e)))?;
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if rule.metric.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "rule {} references an empty metric",
                    rule.id
                )));
            }
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate rule id {}", rule.id)));
            }
        }

        let mut strategy_ids = HashSet::new();
        for strategy in &self.strategies {
            if !strategy_ids.insert(strategy.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate strategy id {}",
                    strategy.id
                )));
            }
            if strategy.steps.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "strategy {} has no steps",
                    strategy.id
                )));
            }
        }

        let known = |id: &str| strategy_ids.contains(id);
        if !known(&self.default_strategy) {
            return Err(ConfigError::Invalid(format!(
                "default strategy {} is not in the catalog",
                self.default_strategy
            )));
        }
        for id in &self.default_alternates {
            if !known(id) {
                return Err(ConfigError::Invalid(format!(
                    "default alternate {} is not in the catalog",
                    id
                )));
            }
        }
        for mapping in &self.strategy_table {
            for id in std::iter::once(&mapping.strategy).chain(mapping.alternates.iter()) {
                if !known(id) {
                    return Err(ConfigError::Invalid(format!(
                        "strategy table entry for {} names unknown strategy {}",
                        mapping.component, id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs)
    }

    pub fn diagnosis_interval(&self) -> Duration {
        Duration::from_secs(self.diagnosis_interval_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    pub fn circuit_interval(&self) -> Duration {
        Duration::from_secs(self.circuit_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::from_secs(self.correlation_window_secs)
    }
}

fn invalid_env(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    }
}
