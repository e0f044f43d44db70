//! # Circuit Breaker Pattern
//!
//! The Circuit Breaker pattern prevents cascading failures by temporarily blocking
//! requests to a failing dependency, allowing it time to recover.
//!
//! ## States
//! - **Closed**: Normal operation, requests pass through. `failure_threshold`
//!   consecutive failures trip the breaker.
//! - **Open**: Requests are rejected. Once `reset_timeout` has elapsed since the
//!   trip, the breaker moves to HalfOpen.
//! - **HalfOpen**: Up to `half_open_max_calls` trial requests at a time.
//!   `success_threshold` successes close the circuit, any failure reopens it.
//!
//! Counters belong to the current state only: every transition zeroes them, and
//! outcomes reported while Open are ignored.
//!
//! ## Usage
//! ```ignore
//! let breaker = CircuitBreaker::new("exchange", CircuitConfig::default(), clock);
//!
//! let quote = breaker.call(async { exchange.quote("BTC-USD").await }).await?;
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::{elapsed_between, Clock};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Blocking requests due to recent failures
    Open,
    /// Testing if the dependency recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
    /// Concurrent trial calls admitted while HalfOpen
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    3
}
fn default_reset_timeout() -> u64 {
    60
}
fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_secs: default_reset_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be > 0".to_string());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be > 0".to_string());
        }
        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CircuitError<E> {
    /// Rejected without calling the dependency
    #[error("circuit {0} is open")]
    Open(String),

    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_state_change: DateTime<Utc>,
    pub trips: u64,
}

/// A state change, reported so callers can log or export it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    last_state_change: DateTime<Utc>,
    trips: u64,
}

/// Circuit breaker guarding one dependency.
///
/// All transitions happen under a single mutex; no method holds it across an
/// await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                last_state_change: now,
                trips: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) -> Transition {
        let from = inner.state;
        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.last_state_change = self.clock.now();
        if to == CircuitState::Open {
            inner.trips += 1;
            warn!(circuit = %self.name, from = %from, "Circuit breaker tripped to OPEN");
        } else {
            info!(circuit = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        }
        crate::metrics::record_circuit_state(&self.name, to);
        Transition { from, to }
    }

    fn reset_timeout_elapsed(&self, inner: &CircuitInner) -> bool {
        elapsed_between(inner.last_state_change, self.clock.now()) >= self.config.reset_timeout()
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.lock().success_count
    }

    /// Move OPEN to HALF_OPEN once the reset timeout has elapsed.
    pub fn evaluate(&self) -> Option<Transition> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.reset_timeout_elapsed(&inner) {
            Some(self.transition(&mut inner, CircuitState::HalfOpen))
        } else {
            None
        }
    }

    /// Whether a call may proceed now. A `true` while HALF_OPEN reserves a
    /// trial slot that the next `record_*` releases.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.reset_timeout_elapsed(&inner) {
            self.transition(&mut inner, CircuitState::HalfOpen);
        }
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    Some(self.transition(&mut inner, CircuitState::Closed))
                } else {
                    None
                }
            }
            // Late result from before the trip
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Some(self.transition(&mut inner, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => Some(self.transition(&mut inner, CircuitState::Open)),
            CircuitState::Open => None,
        }
    }

    /// Open the circuit regardless of counters (operator or recovery step).
    pub fn force_open(&self) -> Option<Transition> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            return None;
        }
        Some(self.transition(&mut inner, CircuitState::Open))
    }

    /// Return to CLOSED with zeroed counters.
    pub fn reset(&self) -> Option<Transition> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
            inner.success_count = 0;
            return None;
        }
        Some(self.transition(&mut inner, CircuitState::Closed))
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_state_change: inner.last_state_change,
            trips: inner.trips,
        }
    }

    /// Run `fut` through the breaker, recording its outcome.
    pub async fn call<F, T, E>(&self, fut: F) -> Result<T, CircuitError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Open(self.name.clone()));
        }
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(failures: u32, successes: u32, reset_secs: u64) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::default();
        let config = CircuitConfig {
            failure_threshold: failures,
            success_threshold: successes,
            reset_timeout_secs: reset_secs,
            half_open_max_calls: 2,
        };
        let cb = CircuitBreaker::new("test", config, Arc::new(clock.clone()));
        (cb, clock)
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let (cb, _) = breaker(3, 2, 10);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_circuit_breaker_trips_after_threshold() {
        let (cb, _) = breaker(3, 2, 10);

        assert!(cb.record_failure().is_none());
        assert!(cb.record_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);

        let t = cb.record_failure().unwrap();
        assert_eq!(t.to, CircuitState::Open);
        assert!(!cb.try_acquire());
        assert_eq!(cb.snapshot().trips, 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (cb, _) = breaker(3, 2, 10);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_waits_for_reset_timeout() {
        let (cb, clock) = breaker(5, 3, 60);
        for _ in 0..5 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(59));
        assert!(cb.evaluate().is_none());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        let t = cb.evaluate().unwrap();
        assert_eq!(t.from, CircuitState::Open);
        assert_eq!(t.to, CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.success_count(), 0);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let (cb, clock) = breaker(1, 2, 1);
        cb.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.record_success().is_none());
        assert!(cb.try_acquire());
        let t = cb.record_success().unwrap();
        assert_eq!(t.to, CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (cb, clock) = breaker(1, 2, 1);
        cb.record_failure();
        clock.advance(Duration::from_secs(1));
        cb.evaluate();

        let t = cb.record_failure().unwrap();
        assert_eq!(t.from, CircuitState::HalfOpen);
        assert_eq!(t.to, CircuitState::Open);
        assert_eq!(cb.snapshot().trips, 2);
    }

    #[test]
    fn test_half_open_limits_trial_calls() {
        let (cb, clock) = breaker(1, 5, 1);
        cb.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(cb.try_acquire());
        assert!(cb.try_acquire());
        assert!(!cb.try_acquire());
        cb.record_success();
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_outcomes_while_open_are_ignored() {
        let (cb, clock) = breaker(2, 1, 10);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.record_failure().is_none());
        assert!(cb.record_success().is_none());
        assert_eq!(cb.failure_count(), 0);

        clock.advance(Duration::from_secs(10));
        cb.evaluate();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.success_count(), 0);
    }

    #[test]
    fn test_force_open_and_reset() {
        let (cb, _) = breaker(5, 1, 10);
        assert!(cb.force_open().is_some());
        assert!(cb.force_open().is_none());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.reset().is_some());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_records_outcome() {
        let (cb, _) = breaker(2, 1, 10);

        let ok: Result<u32, CircuitError<String>> = cb.call(async { Ok::<_, String>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..2 {
            let _ = cb.call(async { Err::<u32, _>("boom".to_string()) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.call(async { Ok::<u32, String>(1) }).await;
        assert!(matches!(rejected, Err(CircuitError::Open(name)) if name == "test"));
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitConfig::default().validate().is_ok());
        let bad = CircuitConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
