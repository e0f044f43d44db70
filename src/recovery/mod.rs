//! Recovery: strategy catalog, step execution and the bounded action pool.

pub mod action;
pub mod executor;
pub mod step;
pub mod strategy;

pub use action::{ActionId, ActionStatus, ExecutedStep, Initiator, RecoveryAction, StepStatus};
pub use executor::RecoveryExecutor;
pub use step::{ProcessStepExecutor, StepError, StepExecutor};
pub use strategy::{FailurePolicy, RecoveryStep, RecoveryStrategy, StepKind, StrategyCatalog};
