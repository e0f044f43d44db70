//! Health check HTTP endpoint for monitoring.
//!
//! `GET /health` returns the [`SystemStatus`] as JSON, `GET /metrics` the
//! Prometheus text exposition. `POST /observations` lets an external agent
//! push metric values when the system runs on an [`InMemoryMetricSource`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::healing::{SelfHealingSystem, SystemStatus};
use crate::metrics;
use crate::sandbox::InMemoryMetricSource;
use crate::types::OverallStatus;

#[derive(Clone)]
pub struct HealthState {
    pub system: SelfHealingSystem,
    /// Target of `POST /observations`; the route answers 404 without one
    pub observations: Option<Arc<InMemoryMetricSource>>,
}

impl HealthState {
    pub fn new(system: SelfHealingSystem) -> Self {
        Self {
            system,
            observations: None,
        }
    }

    pub fn with_observations(mut self, source: Arc<InMemoryMetricSource>) -> Self {
        self.observations = Some(source);
        self
    }
}

/// 503 once the system as a whole is CRITICAL, so load balancers can react.
async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<SystemStatus>) {
    let status = state.system.get_status().await;
    let code = if status.system_health.overall_status == OverallStatus::Critical {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status))
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

async fn push_observations(
    State(state): State<HealthState>,
    Json(values): Json<HashMap<String, f64>>,
) -> StatusCode {
    match &state.observations {
        Some(source) => {
            for (name, value) in values {
                source.set(&name, value);
            }
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/observations", post(push_observations))
        .with_state(state)
}

pub async fn run_health_server(port: u16, state: HealthState) {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(
                %addr,
                error = %e,
                "Health server failed to bind. System will continue without health endpoint."
            );
            return;
        }
    };
    tracing::info!(%addr, "Health check server listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Health check server failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::TracingAlertSink;
    use crate::config::HealingConfig;
    use crate::healing::Collaborators;
    use crate::sandbox::SandboxStepExecutor;
    use crate::source::MetricSource;

    fn state() -> (HealthState, Arc<InMemoryMetricSource>) {
        let config = HealingConfig::default();
        let source = Arc::new(InMemoryMetricSource::seeded(&config));
        let system = SelfHealingSystem::new(
            config,
            Collaborators::new(
                Arc::clone(&source) as Arc<dyn MetricSource>,
                Arc::new(SandboxStepExecutor::new()),
                Arc::new(TracingAlertSink::new()),
            ),
        )
        .unwrap();
        (HealthState::new(system), source)
    }

    #[tokio::test]
    async fn test_health_reports_status() {
        let (state, _) = state();
        state.system.run_health_check().await;
        let (code, Json(status)) = health_check(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status.component_monitors, 5);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_critical_system_is_unavailable() {
        let (state, source) = state();
        for component in ["api_server", "database", "redis", "exchange_connector", "strategy_engine"] {
            source.set_component(component, "error_rate", 0.9);
        }
        state.system.run_health_check().await;
        let (code, _) = health_check(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_observations_need_a_target() {
        let (state, source) = state();
        let values = HashMap::from([("redis.error_rate".to_string(), 0.3)]);

        let code = push_observations(State(state.clone()), Json(values.clone())).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        let with_target = state.with_observations(Arc::clone(&source));
        let code = push_observations(State(with_target), Json(values)).await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        assert_eq!(source.get("redis.error_rate"), Some(0.3));
    }
}
