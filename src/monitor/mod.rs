//! Component health monitoring
//!
//! - `ComponentChecker` - capability contract for one monitored component
//! - `MetricThresholdChecker` - scores a component from warning/critical bounds
//! - `HealthMonitor` - concurrent checks, geometric aggregation, bounded history

pub mod component;
pub mod system;

pub use component::{
    ComponentChecker, ComponentConfig, ComponentHealth, HealthIssue, MetricThreshold,
    MetricThresholdChecker,
};
pub use system::{geometric_mean, HealthMonitor, HealthSample, SystemHealth};
