//! Crate-level error type for the healing control loop.

use crate::config::ConfigError;
use crate::fault::{FaultId, FaultStatus};
use thiserror::Error;

/// Errors surfaced by [`crate::healing::SelfHealingSystem`] operations.
#[derive(Error, Debug)]
pub enum HealingError {
    #[error("self healing system is already running")]
    AlreadyRunning,

    #[error("self healing system is not running")]
    NotRunning,

    #[error("self healing system is disabled")]
    Disabled,

    #[error("Fault not found: {0}")]
    FaultNotFound(FaultId),

    /// Fault status only ever moves forward.
    #[error("Invalid status transition for fault {fault_id}: {from} -> {to}")]
    InvalidTransition {
        fault_id: FaultId,
        from: FaultStatus,
        to: FaultStatus,
    },

    #[error("Fault {0} is {1} and cannot be approved for recovery")]
    NotAwaitingApproval(FaultId, FaultStatus),

    #[error("Fault {0} already has a recovery action queued or running")]
    ActionInFlight(FaultId),

    #[error("Fault {0} has no recovery plan")]
    MissingPlan(FaultId),

    #[error("Unknown recovery strategy: {0}")]
    UnknownStrategy(String),

    #[error("Detection rule not found: {0}")]
    RuleNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
