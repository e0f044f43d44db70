//! Alert delivery
//!
//! Provides a pluggable `AlertSink` trait for delivering alerts raised by the
//! healing core:
//! - `TracingAlertSink` - structured `tracing` events (target `alerts`)
//! - `ChannelAlertSink` - forwards alerts into a tokio channel
//! - `MultiAlertSink` - fans out to several sinks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::types::Severity;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert channel closed")]
    ChannelClosed,

    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Lifecycle of an alert raised to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Open => write!(f, "OPEN"),
            AlertStatus::Acknowledged => write!(f, "ACKNOWLEDGED"),
            AlertStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Fault type or anomaly kind that raised the alert
    pub alert_type: String,
    pub severity: Severity,
    pub component: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl Alert {
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        component: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("ALERT-{}", uuid::Uuid::new_v4().simple()),
            alert_type: alert_type.into(),
            severity,
            component: component.into(),
            message: message.into(),
            timestamp,
            status: AlertStatus::Open,
            acknowledged_at: None,
            resolved_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Receives alerts when a fault or anomaly is created.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Emits alerts as structured logs.
pub struct TracingAlertSink;

impl TracingAlertSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        if alert.is_critical() {
            error!(
                target: "alerts",
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                component = %alert.component,
                timestamp = %alert.timestamp.to_rfc3339(),
                "{}",
                alert.message
            );
        } else {
            warn!(
                target: "alerts",
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                component = %alert.component,
                timestamp = %alert.timestamp.to_rfc3339(),
                "{}",
                alert.message
            );
        }
        Ok(())
    }
}

/// Forwards alerts to a consumer over an unbounded channel.
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        self.tx
            .send(alert.clone())
            .map_err(|_| AlertError::ChannelClosed)
    }
}

/// Sends to every inner sink; reports the first failure after trying all of them.
pub struct MultiAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl MultiAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for MultiAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.send(alert).await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
