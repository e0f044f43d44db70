//! System-wide health aggregation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::component::{ComponentChecker, ComponentHealth};
use crate::alerting::{Alert, AlertStatus};
use crate::clock::{elapsed_between, Clock};
use crate::error::HealingError;
use crate::metrics;
use crate::types::OverallStatus;

/// Point-in-time health of the whole system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_score: f64,
    pub overall_status: OverallStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub last_update: DateTime<Utc>,
    pub uptime_secs: u64,
    pub critical_alerts: Vec<Alert>,
    pub warning_alerts: Vec<Alert>,
}

impl SystemHealth {
    fn empty(at: DateTime<Utc>) -> Self {
        Self {
            overall_score: 1.0,
            overall_status: OverallStatus::Healthy,
            components: HashMap::new(),
            last_update: at,
            uptime_secs: 0,
            critical_alerts: Vec::new(),
            warning_alerts: Vec::new(),
        }
    }

    pub fn open_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.critical_alerts
            .iter()
            .chain(self.warning_alerts.iter())
            .filter(|a| a.status == AlertStatus::Open)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub up: bool,
}

/// Geometric mean of scores; 1.0 for no components, 0.0 if any score is 0
/// or NaN.
pub fn geometric_mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 1.0;
    }
    if scores.iter().any(|s| s.is_nan() || *s <= 0.0) {
        return 0.0;
    }
    let log_sum: f64 = scores.iter().map(|s| s.min(1.0).ln()).sum();
    (log_sum / scores.len() as f64).exp().clamp(0.0, 1.0)
}

/// Checks every registered component and maintains the `SystemHealth` snapshot.
pub struct HealthMonitor {
    checkers: Vec<Arc<dyn ComponentChecker>>,
    state: RwLock<SystemHealth>,
    component_history: RwLock<HashMap<String, VecDeque<HealthSample>>>,
    system_history: RwLock<VecDeque<HealthSample>>,
    history_cap: usize,
    alert_cap: usize,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
}

impl HealthMonitor {
    pub fn new(
        checkers: Vec<Arc<dyn ComponentChecker>>,
        history_cap: usize,
        alert_cap: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            checkers,
            state: RwLock::new(SystemHealth::empty(started_at)),
            component_history: RwLock::new(HashMap::new()),
            system_history: RwLock::new(VecDeque::new()),
            history_cap: history_cap.max(1),
            alert_cap: alert_cap.max(1),
            clock,
            started_at,
        }
    }

    pub fn component_count(&self) -> usize {
        self.checkers.len()
    }

    /// Declared dependencies per component.
    pub fn dependency_map(&self) -> HashMap<String, Vec<String>> {
        self.checkers
            .iter()
            .map(|c| (c.name().to_string(), c.dependencies().to_vec()))
            .collect()
    }

    async fn run_check(&self, checker: &Arc<dyn ComponentChecker>) -> ComponentHealth {
        let timeout = checker.timeout();
        let started = Instant::now();
        match tokio::time::timeout(timeout, checker.check()).await {
            Ok(mut health) => {
                health.last_check = self.clock.now();
                health.check_duration_ms = started.elapsed().as_millis() as u64;
                health
            }
            Err(_) => {
                warn!(component = %checker.name(), timeout_ms = timeout.as_millis() as u64, "Health check timed out");
                ComponentHealth::timed_out(checker.name(), timeout, self.clock.now())
            }
        }
    }

    /// Check every component concurrently and publish the new snapshot.
    pub async fn check_all(&self) -> SystemHealth {
        let results = join_all(self.checkers.iter().map(|c| self.run_check(c))).await;
        let now = self.clock.now();

        let scores: Vec<f64> = results.iter().map(|h| h.score).collect();
        let overall_score = geometric_mean(&scores);
        let overall_status = OverallStatus::from_score(overall_score);

        {
            let mut history = self.component_history.write().await;
            for health in &results {
                metrics::set_component_health(&health.name, health.score);
                let samples = history.entry(health.name.clone()).or_default();
                push_capped(
                    samples,
                    HealthSample {
                        timestamp: now,
                        score: health.score,
                        up: health.status.is_up(),
                    },
                    self.history_cap,
                );
            }
        }
        push_capped(
            &mut *self.system_history.write().await,
            HealthSample {
                timestamp: now,
                score: overall_score,
                up: matches!(overall_status, OverallStatus::Healthy | OverallStatus::Degraded),
            },
            self.history_cap,
        );
        metrics::set_system_health(overall_score);

        let mut state = self.state.write().await;
        state.components = results.into_iter().map(|h| (h.name.clone(), h)).collect();
        state.overall_score = overall_score;
        state.overall_status = overall_status;
        state.last_update = now;
        state.uptime_secs = elapsed_between(self.started_at, now).as_secs();

        debug!(
            score = overall_score,
            status = %overall_status,
            components = state.components.len(),
            "System health updated"
        );
        state.clone()
    }

    pub async fn snapshot(&self) -> SystemHealth {
        let mut health = self.state.read().await.clone();
        health.uptime_secs = elapsed_between(self.started_at, self.clock.now()).as_secs();
        health
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    /// Most recent `limit` samples for a component, oldest first.
    pub async fn component_history(&self, name: &str, limit: usize) -> Vec<HealthSample> {
        let history = self.component_history.read().await;
        history
            .get(name)
            .map(|samples| {
                let skip = samples.len().saturating_sub(limit);
                samples.iter().skip(skip).copied().collect()
            })
            .unwrap_or_default()
    }

    /// Share of system samples that were HEALTHY or DEGRADED, in percent.
    pub async fn uptime_percentage(&self) -> f64 {
        let history = self.system_history.read().await;
        if history.is_empty() {
            return 0.0;
        }
        let up = history.iter().filter(|s| s.up).count();
        up as f64 / history.len() as f64 * 100.0
    }

    /// Attach an alert to the snapshot, dropping the oldest beyond the cap.
    pub async fn push_alert(&self, alert: Alert) {
        let mut state = self.state.write().await;
        let list = if alert.is_critical() {
            &mut state.critical_alerts
        } else {
            &mut state.warning_alerts
        };
        list.push(alert);
        if list.len() > self.alert_cap {
            let excess = list.len() - self.alert_cap;
            list.drain(..excess);
        }
    }

    pub async fn acknowledge_alert(&self, id: &str) -> Result<Alert, HealingError> {
        let now = self.clock.now();
        self.update_alert(id, |alert| {
            if alert.status == AlertStatus::Open {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(now);
            }
        })
        .await
    }

    pub async fn resolve_alert(&self, id: &str) -> Result<Alert, HealingError> {
        let now = self.clock.now();
        self.update_alert(id, |alert| {
            if alert.status != AlertStatus::Resolved {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(now);
            }
        })
        .await
    }

    async fn update_alert<F>(&self, id: &str, f: F) -> Result<Alert, HealingError>
    where
        F: FnOnce(&mut Alert),
    {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let alert = state
            .critical_alerts
            .iter_mut()
            .chain(state.warning_alerts.iter_mut())
            .find(|a| a.id == id)
            .ok_or_else(|| HealingError::AlertNotFound(id.to_string()))?;
        f(alert);
        Ok(alert.clone())
    }
}

fn push_capped<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}
