//! Self-healing fault tolerance for the trading platform.
//!
//! The [`healing::SelfHealingSystem`] watches component health, turns
//! threshold breaches and anomalies into faults, diagnoses them and runs
//! recovery strategies, guarding dependencies with circuit breakers.

pub mod alerting;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod detection;
pub mod diagnosis;
pub mod error;
pub mod fault;
pub mod healing;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod observability;
pub mod recovery;
pub mod resilience;
pub mod sandbox;
pub mod source;
pub mod types;

pub use error::HealingError;
pub use healing::{Collaborators, SelfHealingSystem};
