//! Temporal correlation of fault events across components.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::clock::elapsed_between;
use crate::fault::{Fault, FaultId};

/// Matches events by component and, optionally, fault type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPattern {
    pub component: String,
    #[serde(default)]
    pub fault_type: Option<String>,
}

impl EventPattern {
    pub fn component(component: &str) -> Self {
        Self {
            component: component.to_string(),
            fault_type: None,
        }
    }

    pub fn matches(&self, component: &str, fault_type: &str) -> bool {
        self.component == component
            && self.fault_type.as_deref().map_or(true, |t| t == fault_type)
    }
}

/// "A `cause` event followed within `within_secs` by an `effect` event
/// suggests the cause produced the effect."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: String,
    pub name: String,
    pub cause: EventPattern,
    pub effect: EventPattern,
    pub within_secs: u64,
    /// Confidence in [0, 1] that a match is causal
    pub strength: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEvent {
    pub fault_id: FaultId,
    pub component: String,
    pub fault_type: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Fault> for FaultEvent {
    fn from(fault: &Fault) -> Self {
        Self {
            fault_id: fault.id.clone(),
            component: fault.component.clone(),
            fault_type: fault.fault_type.clone(),
            timestamp: fault.detected_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationKind {
    /// Matched a correlation rule
    Causal,
    /// Merely close in time
    Temporal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub kind: CorrelationKind,
    pub rule_id: Option<String>,
    pub related: FaultEvent,
    pub strength: f64,
    pub description: String,
}

/// Strength assigned to plain temporal proximity.
const TEMPORAL_STRENGTH: f64 = 0.3;

/// Buffers recent fault events and matches them against correlation rules.
pub struct CorrelationEngine {
    rules: Vec<CorrelationRule>,
    window: Duration,
    buffer: RwLock<VecDeque<FaultEvent>>,
    buffer_cap: usize,
}

impl CorrelationEngine {
    pub fn new(rules: Vec<CorrelationRule>, window: Duration, buffer_cap: usize) -> Self {
        Self {
            rules,
            window,
            buffer: RwLock::new(VecDeque::new()),
            buffer_cap: buffer_cap.max(1),
        }
    }

    /// Buffer an event, dropping anything older than the window.
    pub async fn record(&self, event: FaultEvent) {
        let mut buffer = self.buffer.write().await;
        let newest = event.timestamp;
        buffer.push_back(event);
        while let Some(front) = buffer.front() {
            if elapsed_between(front.timestamp, newest) > self.window
                || buffer.len() > self.buffer_cap
            {
                buffer.pop_front();
            } else {
                break;
            }
        }
    }

    /// Events on other components that precede `fault` within the window,
    /// strongest first.
    pub async fn correlate(&self, fault: &Fault) -> Vec<Correlation> {
        let buffer = self.buffer.read().await;
        let mut correlations = Vec::new();

        for event in buffer.iter() {
            if event.fault_id == fault.id || event.component == fault.component {
                continue;
            }
            if event.timestamp > fault.detected_at {
                continue;
            }
            let gap = elapsed_between(event.timestamp, fault.detected_at);
            if gap > self.window {
                continue;
            }

            let causal = self.rules.iter().filter(|r| r.enabled).find(|r| {
                r.cause.matches(&event.component, &event.fault_type)
                    && r.effect.matches(&fault.component, &fault.fault_type)
                    && gap <= Duration::from_secs(r.within_secs)
            });

            correlations.push(match causal {
                Some(rule) => Correlation {
                    kind: CorrelationKind::Causal,
                    rule_id: Some(rule.id.clone()),
                    related: event.clone(),
                    strength: rule.strength.clamp(0.0, 1.0),
                    description: format!(
                        "{}: {} {} preceded {} {} by {}s",
                        rule.name,
                        event.component,
                        event.fault_type,
                        fault.component,
                        fault.fault_type,
                        gap.as_secs()
                    ),
                },
                None => Correlation {
                    kind: CorrelationKind::Temporal,
                    rule_id: None,
                    related: event.clone(),
                    strength: TEMPORAL_STRENGTH,
                    description: format!(
                        "{} {} occurred {}s earlier",
                        event.component,
                        event.fault_type,
                        gap.as_secs()
                    ),
                },
            });
        }

        correlations.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        correlations
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::test_support::rule_fault;
    use crate::types::Severity;

    fn db_to_api() -> CorrelationRule {
        CorrelationRule {
            id: "database_to_api".to_string(),
            name: "Database degradation cascades into API".to_string(),
            cause: EventPattern::component("database"),
            effect: EventPattern::component("api_server"),
            within_secs: 120,
            strength: 0.8,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_causal_match_within_rule_window() {
        let engine = CorrelationEngine::new(vec![db_to_api()], Duration::from_secs(300), 100);
        let mut db = rule_fault("database", "database_connection_failure", Severity::Critical);
        let api = rule_fault("api_server", "high_response_time", Severity::High);
        db.detected_at = api.detected_at - chrono::Duration::seconds(60);

        engine.record(FaultEvent::from(&db)).await;
        engine.record(FaultEvent::from(&api)).await;

        let correlations = engine.correlate(&api).await;
        assert_eq!(correlations.len(), 1);
        assert_eq!(correlations[0].kind, CorrelationKind::Causal);
        assert_eq!(correlations[0].related.fault_id, db.id);
        assert_eq!(correlations[0].strength, 0.8);
    }

    #[tokio::test]
    async fn test_outside_rule_window_is_temporal() {
        let engine = CorrelationEngine::new(vec![db_to_api()], Duration::from_secs(300), 100);
        let mut db = rule_fault("database", "database_connection_failure", Severity::Critical);
        let api = rule_fault("api_server", "high_response_time", Severity::High);
        db.detected_at = api.detected_at - chrono::Duration::seconds(200);
        engine.record(FaultEvent::from(&db)).await;

        let correlations = engine.correlate(&api).await;
        assert_eq!(correlations.len(), 1);
        assert_eq!(correlations[0].kind, CorrelationKind::Temporal);
    }

    #[tokio::test]
    async fn test_old_events_are_pruned() {
        let engine = CorrelationEngine::new(vec![], Duration::from_secs(300), 100);
        let mut old = rule_fault("redis", "high_response_time", Severity::Medium);
        let new = rule_fault("api_server", "high_error_rate", Severity::High);
        old.detected_at = new.detected_at - chrono::Duration::seconds(600);

        engine.record(FaultEvent::from(&old)).await;
        engine.record(FaultEvent::from(&new)).await;
        assert_eq!(engine.buffered().await, 1);
        assert!(engine.correlate(&new).await.is_empty());
    }
}
