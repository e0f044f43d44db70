//! Simulated collaborators for running the control loop without real
//! infrastructure.
//!
//! [`InMemoryMetricSource`] holds metric values that tests, the sandbox binary
//! or the `/observations` endpoint set directly. [`SandboxStepExecutor`]
//! pretends to run recovery steps, records them, and fails on demand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::HealingConfig;
use crate::detection::Comparator;
use crate::recovery::{RecoveryStep, StepError, StepExecutor, StepKind};
use crate::source::{metric_key, MetricError, MetricSource};

/// Metric values keyed by `<component>.<metric>`.
#[derive(Debug, Default)]
pub struct InMemoryMetricSource {
    values: DashMap<String, f64>,
    /// Relative noise applied on every read, 0 for exact values
    jitter: f64,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every threshold and rule metric in `config` at a healthy value.
    pub fn seeded(config: &HealingConfig) -> Self {
        let source = Self::new();
        for component in &config.components {
            for t in &component.thresholds {
                let healthy = if t.higher_is_worse {
                    t.warning / 2.0
                } else {
                    t.warning + (t.warning - t.critical).abs()
                };
                source.seed(&metric_key(&component.name, &t.metric), healthy);
            }
        }
        for rule in &config.rules {
            let healthy = match rule.comparator {
                Comparator::Gt => rule.threshold / 2.0,
                Comparator::Lt => rule.threshold * 2.0,
                Comparator::Eq => rule.threshold + 1.0,
            };
            source.seed(&metric_key(&rule.component, &rule.metric), healthy);
        }
        source
    }

    /// Noise of up to `fraction` of the value, either direction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.abs();
        self
    }

    fn seed(&self, name: &str, value: f64) {
        self.values.entry(name.to_string()).or_insert(value);
    }

    pub fn set(&self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn set_component(&self, component: &str, metric: &str, value: f64) {
        self.set(&metric_key(component, metric), value);
    }

    /// Make a metric unavailable.
    pub fn remove(&self, name: &str) -> Option<f64> {
        self.values.remove(name).map(|(_, v)| v)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn jittered(&self, value: f64) -> f64 {
        if self.jitter == 0.0 {
            return value;
        }
        let factor = rand::rng().random_range(-self.jitter..=self.jitter);
        value * (1.0 + factor)
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn get_metric_value(&self, name: &str) -> Result<f64, MetricError> {
        let value = self
            .get(name)
            .ok_or_else(|| MetricError::Unavailable(name.to_string()))?;
        Ok(self.jittered(value))
    }
}

/// One call seen by [`SandboxStepExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxCall {
    pub component: String,
    pub step_id: String,
    pub kind: StepKind,
    pub succeeded: bool,
}

/// Step executor that never touches the outside world.
#[derive(Debug, Default)]
pub struct SandboxStepExecutor {
    calls: Mutex<Vec<SandboxCall>>,
    /// Remaining scripted failures per step id
    failures: DashMap<String, u32>,
    delay: Duration,
    journal: Option<PathBuf>,
}

impl SandboxStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every step takes `delay` before reporting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Append every executed step to a CSV file.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(path.into());
        self
    }

    /// Fail the next `times` executions of `step_id`.
    pub fn fail_step(&self, step_id: &str, times: u32) {
        self.failures.insert(step_id.to_string(), times);
    }

    pub fn fail_always(&self, step_id: &str) {
        self.fail_step(step_id, u32::MAX);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    pub async fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, step_id: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.step_id == step_id)
            .count()
    }

    fn take_failure(&self, step_id: &str) -> bool {
        match self.failures.get_mut(step_id) {
            Some(mut remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }

    async fn append_journal(&self, call: &SandboxCall) {
        let Some(path) = &self.journal else {
            return;
        };
        let line = format!(
            "{},{},{},{},{}\n",
            Utc::now().to_rfc3339(),
            call.component,
            call.step_id,
            call.kind,
            if call.succeeded { "ok" } else { "failed" }
        );
        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Could not write sandbox journal");
        }
    }
}

#[async_trait]
impl StepExecutor for SandboxStepExecutor {
    async fn execute(&self, component: &str, step: &RecoveryStep) -> Result<String, StepError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self.take_failure(&step.id);
        let call = SandboxCall {
            component: component.to_string(),
            step_id: step.id.clone(),
            kind: step.kind,
            succeeded: !failed,
        };
        debug!(component, step_id = %step.id, kind = %step.kind, failed, "Sandbox step");
        self.append_journal(&call).await;
        self.calls.lock().await.push(call);

        if failed {
            Err(StepError::Failed(format!("sandbox failure for {}", step.id)))
        } else {
            Ok(format!("sandbox: {}", step.render_payload(component)))
        }
    }
}

/// Collaborators for `selfheal run --sandbox`.
pub fn sandbox_collaborators(
    config: &HealingConfig,
    journal: Option<PathBuf>,
) -> (Arc<InMemoryMetricSource>, Arc<SandboxStepExecutor>) {
    let mut executor = SandboxStepExecutor::new();
    if let Some(path) = journal {
        executor = executor.with_journal(path);
    }
    (
        Arc::new(InMemoryMetricSource::seeded(config).with_jitter(0.05)),
        Arc::new(executor),
    )
}
