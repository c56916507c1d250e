//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the worker:
//! - Acquisition loop polls (grants, empty polls, source errors)
//! - Request outcomes and latency
//! - Intake settlements (acks, nacks, malformed messages)
//!
//! # Example
//!
//! ```rust,no_run
//! use market_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Render for a /metrics endpoint
//! let body = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder installer.
///
/// Installs the global recorder and keeps the handle used to render the
/// text exposition format.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves the handle empty.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this exporter.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Acquisition loop
    describe_counter!(
        "market_units_acquired_total",
        "Total units granted by the availability source"
    );
    describe_counter!(
        "market_empty_polls_total",
        "Polls that returned no supply"
    );
    describe_counter!(
        "market_source_errors_total",
        "Polls that failed with an infrastructure error"
    );
    describe_counter!(
        "market_acquisitions_total",
        "Acquisitions finished, labelled by fulfillment"
    );
    describe_histogram!(
        "market_acquisition_duration_seconds",
        "Time from first poll to final outcome"
    );

    // Intake
    describe_counter!(
        "market_requests_received_total",
        "Deliveries received from the request queue"
    );
    describe_counter!(
        "market_requests_acked_total",
        "Deliveries acknowledged after a successful reply"
    );
    describe_counter!(
        "market_requests_nacked_total",
        "Deliveries negatively acknowledged, labelled by requeue"
    );
    describe_counter!(
        "market_requests_malformed_total",
        "Deliveries whose payload or properties could not be used"
    );
    describe_gauge!(
        "market_requests_in_flight",
        "Requests currently being processed"
    );
}

/// Acquisition loop metrics recorder.
pub struct AcquisitionMetrics;

impl AcquisitionMetrics {
    /// Record a positive grant.
    pub fn record_grant(quantity: u64) {
        counter!("market_units_acquired_total").increment(quantity);
    }

    /// Record a poll that returned nothing.
    pub fn record_empty_poll() {
        counter!("market_empty_polls_total").increment(1);
    }

    /// Record a failed poll.
    pub fn record_source_error() {
        counter!("market_source_errors_total").increment(1);
    }

    /// Record a finished acquisition.
    pub fn record_finished(complete: bool, duration: Duration) {
        let fulfillment = if complete { "complete" } else { "partial" };
        counter!("market_acquisitions_total", "fulfillment" => fulfillment).increment(1);
        histogram!("market_acquisition_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Intake metrics recorder.
pub struct IntakeMetrics;

impl IntakeMetrics {
    /// Record a received delivery.
    pub fn record_received() {
        counter!("market_requests_received_total").increment(1);
    }

    /// Record an ack.
    pub fn record_ack() {
        counter!("market_requests_acked_total").increment(1);
    }

    /// Record a nack.
    pub fn record_nack(requeue: bool) {
        let requeue = if requeue { "true" } else { "false" };
        counter!("market_requests_nacked_total", "requeue" => requeue).increment(1);
    }

    /// Record a malformed delivery.
    pub fn record_malformed() {
        counter!("market_requests_malformed_total").increment(1);
    }

    /// Record the number of requests in flight.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_in_flight(count: usize) {
        gauge!("market_requests_in_flight").set(count as f64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn exporter_starts_uninstalled() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn install_and_render() {
        let mut exporter = MetricsExporter::new();
        exporter.install().unwrap();

        AcquisitionMetrics::record_grant(3);
        AcquisitionMetrics::record_empty_poll();
        IntakeMetrics::record_ack();

        // Another test may have installed the recorder first.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains("market_units_acquired_total"));
            assert!(rendered.contains("market_requests_acked_total"));
        }
    }
}
