//! Status and health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use market_runtime::{HealthCheck, HealthStatus};
use serde_json::{Value, json};

/// Plain-text banner.
///
/// # Endpoint
///
/// ```text
/// GET /
/// ```
#[allow(clippy::unused_async)]
pub async fn root() -> &'static str {
    "Market service operational"
}

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK while the process is serving HTTP. Does NOT look at the
/// broker connection.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Readiness check based on the request intake.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded (all worker slots busy)
/// - 503 Service Unavailable: not consuming from the request queue
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "component": "intake",
///   "status": "healthy",
///   "in_flight": 3,
///   "capacity": 16
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthCheck>) {
    let health = state.intake.health();

    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => {
            tracing::debug!(message = ?health.message, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (status, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_runtime::IntakeStatus;

    #[tokio::test]
    async fn simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn idle_intake_is_not_ready() {
        let state = AppState::new(IntakeStatus::new(4));

        let (status, Json(health)) = readiness(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.capacity, 4);
    }
}
