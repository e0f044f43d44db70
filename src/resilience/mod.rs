//! # Resilience Module
//!
//! ## Components
//! - `CircuitBreaker`: Isolates a failing dependency after threshold failures.
//! - `CircuitRegistry`: One breaker per guarded dependency, created on demand.

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState, Transition,
};
pub use registry::CircuitRegistry;
