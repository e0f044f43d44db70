//! Per-component health checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::source::{metric_key, MetricError, MetricSource};
use crate::types::{ComponentStatus, Severity};

/// Warning/critical bounds for one metric of a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub metric: String,
    pub warning: f64,
    pub critical: f64,
    /// False for metrics where lower is worse (success ratios)
    #[serde(default = "default_higher_is_worse")]
    pub higher_is_worse: bool,
}

fn default_higher_is_worse() -> bool {
    true
}

/// Score of a metric beyond its critical bound.
const CRITICAL_SCORE: f64 = 0.25;

impl MetricThreshold {
    /// Whether `value` is past `bound` in the metric's bad direction.
    fn exceeds(&self, value: f64, bound: f64) -> bool {
        if self.higher_is_worse {
            value > bound
        } else {
            value < bound
        }
    }

    /// 1.0 inside the warning bound, 0.9 down to 0.5 between warning and
    /// critical, `CRITICAL_SCORE` beyond critical.
    pub fn score(&self, value: f64) -> f64 {
        if self.exceeds(value, self.critical) || value == self.critical {
            return CRITICAL_SCORE;
        }
        if !self.exceeds(value, self.warning) {
            return 1.0;
        }
        let span = (self.critical - self.warning).abs();
        if span == 0.0 {
            return CRITICAL_SCORE;
        }
        let progress = ((value - self.warning).abs() / span).clamp(0.0, 1.0);
        0.9 - 0.4 * progress
    }

    pub fn severity(&self, value: f64) -> Option<Severity> {
        if self.exceeds(value, self.critical) || value == self.critical {
            Some(Severity::High)
        } else if self.exceeds(value, self.warning) {
            Some(Severity::Medium)
        } else {
            None
        }
    }
}

/// Static description of a monitored component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    /// Components this one calls
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub thresholds: Vec<MetricThreshold>,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,
}

fn default_check_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub score: f64,
    pub last_check: DateTime<Utc>,
    pub check_duration_ms: u64,
    pub metrics: HashMap<String, f64>,
    pub issues: Vec<HealthIssue>,
}

impl ComponentHealth {
    /// NaN scores count as 0.
    pub fn from_score(name: impl Into<String>, score: f64, at: DateTime<Utc>) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            name: name.into(),
            status: ComponentStatus::from_score(score),
            score,
            last_check: at,
            check_duration_ms: 0,
            metrics: HashMap::new(),
            issues: Vec::new(),
        }
    }

    /// Result recorded when a check overruns its timeout.
    pub fn timed_out(name: impl Into<String>, timeout: Duration, at: DateTime<Utc>) -> Self {
        let name = name.into();
        let mut health = Self::from_score(name.clone(), 0.5, at);
        health.status = ComponentStatus::Unhealthy;
        health.check_duration_ms = timeout.as_millis() as u64;
        health.issues.push(HealthIssue {
            issue_type: "check_timeout".to_string(),
            severity: Severity::High,
            description: format!("Health check for {} exceeded {:?}", name, timeout),
            metric: None,
            value: None,
            threshold: None,
            detected_at: at,
        });
        health
    }
}

/// Capability contract for anything the monitor can check.
#[async_trait]
pub trait ComponentChecker: Send + Sync {
    fn name(&self) -> &str;

    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Upper bound for one `check` call.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn check(&self) -> ComponentHealth;
}

/// Scores a component from its metric thresholds.
///
/// The component score is the worst score among its available metrics.
/// Metrics the source cannot supply, or supplies as NaN or infinity, are
/// reported as issues but do not lower the score.
pub struct MetricThresholdChecker {
    config: ComponentConfig,
    source: Arc<dyn MetricSource>,
    clock: Arc<dyn Clock>,
}

impl MetricThresholdChecker {
    pub fn new(config: ComponentConfig, source: Arc<dyn MetricSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            source,
            clock,
        }
    }
}

#[async_trait]
impl ComponentChecker for MetricThresholdChecker {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dependencies(&self) -> &[String] {
        &self.config.dependencies
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.check_timeout_ms)
    }

    async fn check(&self) -> ComponentHealth {
        let now = self.clock.now();
        let mut score: f64 = 1.0;
        let mut metrics = HashMap::new();
        let mut issues = Vec::new();

        for threshold in &self.config.thresholds {
            let key = metric_key(&self.config.name, &threshold.metric);
            let observed = self.source.get_metric_value(&key).await.and_then(|value| {
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(MetricError::Invalid(format!("{} = {}", key, value)))
                }
            });
            match observed {
                Ok(value) => {
                    metrics.insert(threshold.metric.clone(), value);
                    score = score.min(threshold.score(value));
                    if let Some(severity) = threshold.severity(value) {
                        let bound = if severity == Severity::High {
                            threshold.critical
                        } else {
                            threshold.warning
                        };
                        issues.push(HealthIssue {
                            issue_type: format!("{}_threshold", threshold.metric),
                            severity,
                            description: format!(
                                "{} {} = {} beyond {}",
                                self.config.name, threshold.metric, value, bound
                            ),
                            metric: Some(threshold.metric.clone()),
                            value: Some(value),
                            threshold: Some(bound),
                            detected_at: now,
                        });
                    }
                }
                Err(e) => issues.push(HealthIssue {
                    issue_type: "metric_unavailable".to_string(),
                    severity: Severity::Low,
                    description: e.to_string(),
                    metric: Some(threshold.metric.clone()),
                    value: None,
                    threshold: None,
                    detected_at: now,
                }),
            }
        }

        let mut health = ComponentHealth::from_score(self.config.name.clone(), score, now);
        health.metrics = metrics;
        health.issues = issues;
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct FixedSource(HashMap<String, f64>);

    #[async_trait]
    impl MetricSource for FixedSource {
        async fn get_metric_value(&self, name: &str) -> Result<f64, MetricError> {
            self.0
                .get(name)
                .copied()
                .ok_or_else(|| MetricError::Unavailable(name.to_string()))
        }
    }

    fn response_time() -> MetricThreshold {
        MetricThreshold {
            metric: "response_time".to_string(),
            warning: 500.0,
            critical: 2000.0,
            higher_is_worse: true,
        }
    }

    #[test]
    fn test_threshold_scoring() {
        let t = response_time();
        assert_eq!(t.score(100.0), 1.0);
        assert_eq!(t.score(500.0), 1.0);
        assert!((t.score(1250.0) - 0.7).abs() < 1e-9);
        assert_eq!(t.score(2000.0), CRITICAL_SCORE);
        assert_eq!(t.severity(100.0), None);
        assert_eq!(t.severity(800.0), Some(Severity::Medium));
        assert_eq!(t.severity(5000.0), Some(Severity::High));
    }

    #[test]
    fn test_lower_is_worse_threshold() {
        let t = MetricThreshold {
            metric: "connection_success".to_string(),
            warning: 0.9,
            critical: 0.5,
            higher_is_worse: false,
        };
        assert_eq!(t.score(0.99), 1.0);
        assert!(t.score(0.7) < 0.9 && t.score(0.7) > 0.5);
        assert_eq!(t.score(0.2), CRITICAL_SCORE);
    }

    #[tokio::test]
    async fn test_checker_uses_worst_metric() {
        let mut values = HashMap::new();
        values.insert("api_server.response_time".to_string(), 100.0);
        values.insert("api_server.error_rate".to_string(), 0.5);
        let source = Arc::new(FixedSource(values));

        let checker = MetricThresholdChecker::new(
            ComponentConfig {
                name: "api_server".to_string(),
                dependencies: vec!["database".to_string()],
                thresholds: vec![
                    response_time(),
                    MetricThreshold {
                        metric: "error_rate".to_string(),
                        warning: 0.05,
                        critical: 0.2,
                        higher_is_worse: true,
                    },
                ],
                check_timeout_ms: 1000,
            },
            source,
            Arc::new(ManualClock::default()),
        );

        let health = checker.check().await;
        assert_eq!(health.score, CRITICAL_SCORE);
        assert_eq!(health.status, ComponentStatus::Down);
        assert_eq!(health.issues.len(), 1);
        assert_eq!(checker.dependencies(), &["database".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_metrics_do_not_lower_score() {
        let checker = MetricThresholdChecker::new(
            ComponentConfig {
                name: "redis".to_string(),
                dependencies: vec![],
                thresholds: vec![response_time()],
                check_timeout_ms: 1000,
            },
            Arc::new(FixedSource(HashMap::new())),
            Arc::new(ManualClock::default()),
        );
        let health = checker.check().await;
        assert_eq!(health.score, 1.0);
        assert_eq!(health.issues[0].issue_type, "metric_unavailable");
    }

    #[tokio::test]
    async fn test_non_finite_metric_is_unavailable() {
        let clock = ManualClock::default();
        clock.advance(Duration::from_secs(90));
        let mut values = HashMap::new();
        values.insert("database.response_time".to_string(), f64::NAN);
        let checker = MetricThresholdChecker::new(
            ComponentConfig {
                name: "database".to_string(),
                dependencies: vec![],
                thresholds: vec![response_time()],
                check_timeout_ms: 1000,
            },
            Arc::new(FixedSource(values)),
            Arc::new(clock.clone()),
        );

        let health = checker.check().await;
        assert_eq!(health.score, 1.0);
        assert!(health.metrics.is_empty());
        assert_eq!(health.issues[0].issue_type, "metric_unavailable");
        assert_eq!(health.issues[0].detected_at, clock.now());
        assert_eq!(health.last_check, clock.now());
    }

    #[test]
    fn test_nan_score_counts_as_zero() {
        let health = ComponentHealth::from_score("redis", f64::NAN, Utc::now());
        assert_eq!(health.score, 0.0);
    }
}
