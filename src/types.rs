//! Common Types Module
//!
//! Shared enums used across the healing core to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to rules, faults, health issues and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Risk level of a recovery strategy or plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// One level higher, saturating at `Critical`.
    pub fn raised(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Health status of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Down,
}

impl ComponentStatus {
    /// Bucket a normalized score: >=0.9 healthy, >=0.7 degraded, >=0.5 unhealthy, else down.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            ComponentStatus::Healthy
        } else if score >= 0.7 {
            ComponentStatus::Degraded
        } else if score >= 0.5 {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Down
        }
    }

    /// Whether the component counts as serving traffic for uptime purposes.
    pub fn is_up(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentStatus::Healthy => write!(f, "HEALTHY"),
            ComponentStatus::Degraded => write!(f, "DEGRADED"),
            ComponentStatus::Unhealthy => write!(f, "UNHEALTHY"),
            ComponentStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Aggregate status of the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl OverallStatus {
    /// Same buckets as [`ComponentStatus::from_score`], with `Critical` at the bottom.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            OverallStatus::Healthy
        } else if score >= 0.7 {
            OverallStatus::Degraded
        } else if score >= 0.5 {
            OverallStatus::Unhealthy
        } else {
            OverallStatus::Critical
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Healthy => write!(f, "HEALTHY"),
            OverallStatus::Degraded => write!(f, "DEGRADED"),
            OverallStatus::Unhealthy => write!(f, "UNHEALTHY"),
            OverallStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}
