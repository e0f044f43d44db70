//! Fault detector: threshold rules plus anomaly scoring.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::anomaly::{AnomalyConfig, AnomalyDetector, AnomalySignal};
use super::rule::DetectionRule;
use crate::clock::{elapsed_between, Clock};
use crate::error::HealingError;
use crate::fault::{DetectionInfo, DetectionMethod, Fault, FaultId, FaultKey};
use crate::logging::KeyedLogThrottle;
use crate::metrics;
use crate::source::{metric_key, MetricError, MetricSource};

/// Upper bound for one metric lookup.
const METRIC_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One emitted detection, kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub fault_id: FaultId,
    pub method: DetectionMethod,
    pub rule_id: Option<String>,
    pub component: String,
    pub fault_type: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    /// Anomaly detector name, `None` for rule detections
    pub detector: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Detector that produced an anomaly signal.
struct AnomalySource {
    name: String,
    sensitivity: f64,
}

struct DetectorState {
    /// When each rule's condition started holding
    breach_started: HashMap<String, DateTime<Utc>>,
    /// Last anomaly fault per component/type
    last_anomaly: HashMap<FaultKey, DateTime<Utc>>,
    missing_metrics: KeyedLogThrottle,
    anomaly: Option<Box<dyn AnomalyDetector>>,
}

/// Evaluates detection rules and anomaly signals against the metric source.
///
/// A rule fires only once its condition has held for the rule's `duration`;
/// a breach that clears earlier, or a metric that goes missing, restarts the
/// window. After firing the window restarts too, so a condition that persists
/// past the fault's resolution needs another full window to fire again.
pub struct FaultDetector {
    source: Arc<dyn MetricSource>,
    clock: Arc<dyn Clock>,
    rules: RwLock<Vec<DetectionRule>>,
    /// component/metric pairs fed to the anomaly detector
    anomaly_targets: Vec<(String, String)>,
    anomaly_config: AnomalyConfig,
    correlation_window: Duration,
    state: Mutex<DetectorState>,
    history: RwLock<VecDeque<DetectionRecord>>,
    history_cap: usize,
}

impl FaultDetector {
    pub fn new(
        rules: Vec<DetectionRule>,
        source: Arc<dyn MetricSource>,
        clock: Arc<dyn Clock>,
        correlation_window: Duration,
        history_cap: usize,
    ) -> Self {
        Self {
            source,
            clock,
            rules: RwLock::new(rules),
            anomaly_targets: Vec::new(),
            anomaly_config: AnomalyConfig::default(),
            correlation_window,
            state: Mutex::new(DetectorState {
                breach_started: HashMap::new(),
                last_anomaly: HashMap::new(),
                missing_metrics: KeyedLogThrottle::new(),
                anomaly: None,
            }),
            history: RwLock::new(VecDeque::new()),
            history_cap: history_cap.max(1),
        }
    }

    /// Enable anomaly scoring for the given component/metric pairs.
    pub fn with_anomaly_detector(
        mut self,
        detector: Box<dyn AnomalyDetector>,
        config: AnomalyConfig,
        targets: Vec<(String, String)>,
    ) -> Self {
        self.anomaly_targets = targets;
        self.anomaly_config = config;
        self.state.get_mut().anomaly = Some(detector);
        self
    }

    async fn fetch(&self, key: &str) -> Result<f64, MetricError> {
        match tokio::time::timeout(METRIC_FETCH_TIMEOUT, self.source.get_metric_value(key)).await {
            Ok(result) => result,
            Err(_) => Err(MetricError::Unavailable(format!("{} (timed out)", key))),
        }
    }

    /// Run every enabled rule and the anomaly pass once.
    ///
    /// `active` holds the component/type pairs that already have an active
    /// fault; no new fault is emitted for those.
    pub async fn evaluate(&self, active: &HashSet<FaultKey>) -> Vec<Fault> {
        let rules: Vec<DetectionRule> = self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect();

        let mut observations = Vec::with_capacity(rules.len());
        for rule in &rules {
            let key = metric_key(&rule.component, &rule.metric);
            observations.push((key.clone(), self.fetch(&key).await));
        }

        let mut anomaly_observations = Vec::new();
        if self.anomaly_config.enabled {
            for (component, metric) in &self.anomaly_targets {
                let key = metric_key(component, metric);
                if let Ok(value) = self.fetch(&key).await {
                    anomaly_observations.push((component.clone(), metric.clone(), key, value));
                }
            }
        }

        let now = self.clock.now();
        let mut emitted: HashSet<FaultKey> = HashSet::new();
        let mut faults = Vec::new();
        let mut fired_rules = Vec::new();

        let mut state = self.state.lock().await;

        for (rule, (key, observation)) in rules.iter().zip(observations) {
            let value = match observation {
                Ok(value) => {
                    if state.missing_metrics.clear(&key) {
                        info!(rule_id = %rule.id, metric = %key, "Metric available again");
                    }
                    value
                }
                Err(e) => {
                    if state.missing_metrics.should_log(&key) {
                        warn!(rule_id = %rule.id, metric = %key, error = %e, "Metric unavailable, skipping rule");
                    }
                    metrics::record_rule_skipped(&rule.id);
                    state.breach_started.remove(&rule.id);
                    continue;
                }
            };

            if !rule.matches(value) {
                state.breach_started.remove(&rule.id);
                continue;
            }

            let started = *state.breach_started.entry(rule.id.clone()).or_insert(now);
            let held = elapsed_between(started, now);
            if held < rule.duration() {
                debug!(
                    rule_id = %rule.id,
                    held_secs = held.as_secs(),
                    required_secs = rule.duration_secs,
                    "Rule condition holding, waiting for sustained breach"
                );
                continue;
            }

            let fault_key = FaultKey::new(rule.component.clone(), rule.fault_type());
            if active.contains(&fault_key) || emitted.contains(&fault_key) {
                continue;
            }

            let fault = Fault::new(
                rule.fault_type(),
                rule.component.clone(),
                rule.severity,
                format!(
                    "{} detected in {}: {} = {} {} {}",
                    rule.name, rule.component, rule.metric, value, rule.comparator, rule.threshold
                ),
                DetectionInfo {
                    method: DetectionMethod::Rule,
                    rule_id: Some(rule.id.clone()),
                    metric: rule.metric.clone(),
                    value,
                    threshold: rule.threshold,
                    breach_started_at: started,
                    anomaly_score: None,
                    detector: None,
                },
                now,
            );
            state.breach_started.remove(&rule.id);
            emitted.insert(fault_key);
            fired_rules.push(rule.id.clone());
            faults.push(fault);
        }

        for (component, metric, series, value) in anomaly_observations {
            let Some(detector) = state.anomaly.as_mut() else {
                break;
            };
            let Some(signal) = detector.observe(&series, value) else {
                continue;
            };
            let source = AnomalySource {
                name: detector.name().to_string(),
                sensitivity: detector.sensitivity(),
            };
            let fault_key = FaultKey::new(component.clone(), format!("anomaly_{}", metric));
            if active.contains(&fault_key) || emitted.contains(&fault_key) {
                continue;
            }
            if let Some(last) = state.last_anomaly.get(&fault_key) {
                if elapsed_between(*last, now) < self.correlation_window {
                    continue;
                }
            }
            state.last_anomaly.insert(fault_key.clone(), now);
            emitted.insert(fault_key.clone());
            faults.push(self.anomaly_fault(&component, &metric, &fault_key, &signal, source, now));
        }
        drop(state);

        if !fired_rules.is_empty() {
            let mut rules = self.rules.write().await;
            for rule in rules.iter_mut().filter(|r| fired_rules.contains(&r.id)) {
                rule.hit_count += 1;
            }
        }

        if !faults.is_empty() {
            let mut history = self.history.write().await;
            for fault in &faults {
                info!(
                    fault_id = %fault.id,
                    component = %fault.component,
                    fault_type = %fault.fault_type,
                    severity = %fault.severity,
                    method = %fault.detection.method,
                    value = fault.detection.value,
                    "Fault detected"
                );
                metrics::record_fault_detected(
                    &fault.component,
                    &fault.severity.to_string(),
                    &fault.detection.method.to_string(),
                );
                history.push_back(DetectionRecord {
                    fault_id: fault.id.clone(),
                    method: fault.detection.method,
                    rule_id: fault.detection.rule_id.clone(),
                    component: fault.component.clone(),
                    fault_type: fault.fault_type.clone(),
                    metric: fault.detection.metric.clone(),
                    value: fault.detection.value,
                    threshold: fault.detection.threshold,
                    detector: fault.detection.detector.clone(),
                    timestamp: now,
                });
                while history.len() > self.history_cap {
                    history.pop_front();
                }
            }
        }

        faults
    }

    fn anomaly_fault(
        &self,
        component: &str,
        metric: &str,
        key: &FaultKey,
        signal: &AnomalySignal,
        source: AnomalySource,
        now: DateTime<Utc>,
    ) -> Fault {
        Fault::new(
            key.fault_type.clone(),
            component,
            self.anomaly_config.severity,
            format!(
                "Anomalous {} in {}: {} (baseline {:.3} +/- {:.3}, {} score {:.2})",
                metric,
                component,
                signal.value,
                signal.baseline_mean,
                signal.baseline_std,
                source.name,
                signal.score
            ),
            DetectionInfo {
                method: DetectionMethod::Anomaly,
                rule_id: None,
                metric: metric.to_string(),
                value: signal.value,
                threshold: source.sensitivity,
                breach_started_at: now,
                anomaly_score: Some(signal.score),
                detector: Some(source.name),
            },
            now,
        )
    }

    pub async fn enable_rule(&self, id: &str) -> Result<(), HealingError> {
        self.set_rule_enabled(id, true).await
    }

    /// Disable a rule and forget any breach it was timing.
    pub async fn disable_rule(&self, id: &str) -> Result<(), HealingError> {
        self.set_rule_enabled(id, false).await?;
        self.state.lock().await.breach_started.remove(id);
        Ok(())
    }

    async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<(), HealingError> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| HealingError::RuleNotFound(id.to_string()))?;
        rule.enabled = enabled;
        info!(rule_id = %id, enabled, "Detection rule updated");
        Ok(())
    }

    pub async fn rules(&self) -> Vec<DetectionRule> {
        self.rules.read().await.clone()
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Most recent `limit` detections, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<DetectionRecord> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}
