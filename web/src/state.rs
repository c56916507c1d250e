//! Application state for Axum handlers.

use market_runtime::IntakeStatus;
use metrics_exporter_prometheus::PrometheusHandle;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live view of the request intake
    pub intake: IntakeStatus,
    /// Handle for rendering metrics, if a recorder was installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state observing `intake`, without metrics.
    #[must_use]
    pub const fn new(intake: IntakeStatus) -> Self {
        Self {
            intake,
            metrics: None,
        }
    }

    /// Serve metrics rendered by `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
