//! HTTP shell for the market worker.
//!
//! The worker does its real work on the message queue; this crate only
//! exposes passive endpoints for operators and orchestrators:
//!
//! | route      | purpose                                        |
//! |------------|------------------------------------------------|
//! | `/`        | plain-text banner                              |
//! | `/health`  | liveness, always 200 while serving             |
//! | `/ready`   | readiness, 503 unless the intake is consuming  |
//! | `/metrics` | Prometheus text exposition                     |
//!
//! # Example
//!
//! ```ignore
//! use market_web::{AppState, router};
//!
//! let app = router(AppState::new(intake.status()).with_metrics(handle));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3004").await?;
//! axum::serve(listener, app).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router with all endpoints, request tracing and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
