//! Metric source contract.
//!
//! The healing core never produces raw observations itself; it asks an external
//! source for the current value of a named metric. A missing value is an
//! ordinary outcome, not a failure of the core. Metrics are named
//! `<component>.<metric>`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("metric {0} not available")]
    Unavailable(String),

    #[error("unknown metric: {0}")]
    Unknown(String),

    #[error("metric value not usable: {0}")]
    Invalid(String),

    #[error("metric source error: {0}")]
    Source(String),
}

/// Supplies raw numeric observations (response time, error rate, ...).
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn get_metric_value(&self, name: &str) -> Result<f64, MetricError>;
}

/// Name under which a component's metric is looked up: `api_server.error_rate`.
pub fn metric_key(component: &str, metric: &str) -> String {
    format!("{}.{}", component, metric)
}
