//! Prometheus Metrics Module
//!
//! Pre-registered collectors for the healing loop, exposed on `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, GaugeVec, HistogramVec, IntCounterVec, IntGauge,
    TextEncoder,
};

use crate::resilience::CircuitState;

lazy_static! {
    // --- Fault Metrics ---

    /// Faults detected (by component, severity, detection method)
    pub static ref FAULTS_DETECTED: IntCounterVec = register_int_counter_vec!(
        opts!("selfheal_faults_detected_total", "Faults detected"),
        &["component", "severity", "method"]
    ).expect("FATAL: Failed to register FAULTS_DETECTED metric - check for duplicate registration");

    /// Faults resolved (by component, how)
    pub static ref FAULTS_RESOLVED: IntCounterVec = register_int_counter_vec!(
        opts!("selfheal_faults_resolved_total", "Faults resolved"),
        &["component", "resolution"]
    ).expect("FATAL: Failed to register FAULTS_RESOLVED metric - check for duplicate registration");

    /// Rule evaluations skipped because the metric source had no value
    pub static ref RULES_SKIPPED: IntCounterVec = register_int_counter_vec!(
        opts!("selfheal_rule_evaluations_skipped_total", "Rule evaluations skipped for missing metrics"),
        &["rule_id"]
    ).expect("FATAL: Failed to register RULES_SKIPPED metric - check for duplicate registration");

    // --- Recovery Metrics ---

    /// Completed recovery actions (by strategy, outcome)
    pub static ref RECOVERY_ACTIONS: IntCounterVec = register_int_counter_vec!(
        opts!("selfheal_recovery_actions_total", "Completed recovery actions"),
        &["strategy", "outcome"]
    ).expect("FATAL: Failed to register RECOVERY_ACTIONS metric - check for duplicate registration");

    /// Recovery action duration in seconds
    pub static ref RECOVERY_DURATION: HistogramVec = register_histogram_vec!(
        "selfheal_recovery_duration_seconds",
        "Recovery action wall time",
        &["strategy"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    ).expect("FATAL: Failed to register RECOVERY_DURATION metric - check for duplicate registration");

    /// Recovery actions currently RUNNING
    pub static ref RECOVERY_RUNNING: IntGauge = register_int_gauge!(
        opts!("selfheal_recovery_actions_running", "Recovery actions currently running")
    ).expect("FATAL: Failed to register RECOVERY_RUNNING metric - check for duplicate registration");

    // --- Health Metrics ---

    /// Aggregate system health score
    pub static ref SYSTEM_HEALTH_SCORE: Gauge = register_gauge!(
        opts!("selfheal_system_health_score", "Geometric mean of component health scores")
    ).expect("FATAL: Failed to register SYSTEM_HEALTH_SCORE metric - check for duplicate registration");

    /// Per-component health score
    pub static ref COMPONENT_HEALTH_SCORE: GaugeVec = register_gauge_vec!(
        opts!("selfheal_component_health_score", "Component health score"),
        &["component"]
    ).expect("FATAL: Failed to register COMPONENT_HEALTH_SCORE metric - check for duplicate registration");

    // --- Circuit Breaker Metrics ---

    /// Circuit breaker state (0=closed, 1=half_open, 2=open)
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = register_gauge_vec!(
        opts!("selfheal_circuit_breaker_state", "Circuit breaker state (0=closed, 1=half_open, 2=open)"),
        &["name"]
    ).expect("FATAL: Failed to register CIRCUIT_BREAKER_STATE metric - check for duplicate registration");

    /// Circuit breaker trips
    pub static ref CIRCUIT_BREAKER_TRIPS: IntCounterVec = register_int_counter_vec!(
        opts!("selfheal_circuit_breaker_trips_total", "Circuit breaker trips"),
        &["name"]
    ).expect("FATAL: Failed to register CIRCUIT_BREAKER_TRIPS metric - check for duplicate registration");
}

pub fn record_fault_detected(component: &str, severity: &str, method: &str) {
    FAULTS_DETECTED
        .with_label_values(&[component, severity, method])
        .inc();
}

pub fn record_fault_resolved(component: &str, resolution: &str) {
    FAULTS_RESOLVED
        .with_label_values(&[component, resolution])
        .inc();
}

pub fn record_rule_skipped(rule_id: &str) {
    RULES_SKIPPED.with_label_values(&[rule_id]).inc();
}

/// Record a finished recovery action
pub fn record_recovery(strategy: &str, outcome: &str, duration_secs: f64) {
    RECOVERY_ACTIONS
        .with_label_values(&[strategy, outcome])
        .inc();
    RECOVERY_DURATION
        .with_label_values(&[strategy])
        .observe(duration_secs);
}

pub fn set_running_actions(count: usize) {
    RECOVERY_RUNNING.set(count as i64);
}

pub fn set_system_health(score: f64) {
    SYSTEM_HEALTH_SCORE.set(score);
}

pub fn set_component_health(component: &str, score: f64) {
    COMPONENT_HEALTH_SCORE
        .with_label_values(&[component])
        .set(score);
}

/// Update the circuit gauge; counts a trip on every entry into OPEN
pub fn record_circuit_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    CIRCUIT_BREAKER_STATE.with_label_values(&[name]).set(value);
    if state == CircuitState::Open {
        CIRCUIT_BREAKER_TRIPS.with_label_values(&[name]).inc();
    }
}

/// Get metrics as text for /metrics endpoint
///
/// Encoding failures are logged and yield an empty body.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_circuit_state_counts_trips() {
        let before = CIRCUIT_BREAKER_TRIPS
            .with_label_values(&["metrics-test"])
            .get();
        record_circuit_state("metrics-test", CircuitState::Open);
        record_circuit_state("metrics-test", CircuitState::HalfOpen);
        let after = CIRCUIT_BREAKER_TRIPS
            .with_label_values(&["metrics-test"])
            .get();
        assert_eq!(after - before, 1);
        assert_eq!(
            CIRCUIT_BREAKER_STATE
                .with_label_values(&["metrics-test"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_gather_metrics() {
        record_fault_detected("api_server", "HIGH", "RULE");

        let output = gather_metrics();
        assert!(
            output.contains("selfheal_faults_detected_total"),
            "Expected metrics output to contain 'selfheal_faults_detected_total', got: {}",
            &output[..output.len().min(200)]
        );
    }
}
