//! Service bootstrap and lifecycle.
//!
//! Startup order: broker, metrics, market client, HTTP listener, intake.
//! Anything that fails before the intake starts aborts startup; the broker
//! producer is flushed on every exit path once it exists.

use crate::config::Config;
use anyhow::Context;
use market_client::MarketClient;
use market_core::MessageBroker;
use market_redpanda::RedpandaBroker;
use market_runtime::metrics::MetricsExporter;
use market_runtime::{ReplyDispatcher, RequestHandler, RequestIntake};
use market_web::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Run the service until a shutdown signal is received.
///
/// # Errors
///
/// Returns an error if any component fails to start or the HTTP server
/// fails while running.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let mut broker_builder = RedpandaBroker::builder()
        .brokers(config.redpanda.brokers.as_str())
        .consumer_group(config.redpanda.consumer_group.as_str());
    if let Some(dead_letter_queue) = &config.redpanda.dead_letter_queue {
        broker_builder = broker_builder.dead_letter_queue(dead_letter_queue.as_str());
    }
    let broker: Arc<dyn MessageBroker> =
        Arc::new(broker_builder.build().context("Failed to create broker")?);
    info!("✓ Broker client created");

    start(config, broker).await
}

/// Run the service on an already created broker.
///
/// The broker must answer [`MessageBroker::connect`] before anything else
/// starts.
///
/// # Errors
///
/// Returns an error if the broker is unreachable, any other component fails
/// to start, or the HTTP server fails while running.
pub async fn start(config: Config, broker: Arc<dyn MessageBroker>) -> anyhow::Result<()> {
    broker
        .connect()
        .await
        .with_context(|| format!("Failed to connect to broker at {}", config.redpanda.brokers))?;
    info!("✓ Broker connected");

    let mut exporter = MetricsExporter::new();
    exporter.install().context("Failed to install metrics recorder")?;

    let result = serve(config, Arc::clone(&broker), exporter).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to flush broker on shutdown");
    }
    result
}

async fn serve(
    config: Config,
    broker: Arc<dyn MessageBroker>,
    exporter: MetricsExporter,
) -> anyhow::Result<()> {
    let market = MarketClient::with_timeout(
        config.market.api_url.as_str(),
        Duration::from_millis(config.market.timeout_ms),
    )
    .context("Failed to create market client")?;
    info!(api_url = %market.api_url(), "✓ Market client created");

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

    let policy = config.policy();
    info!(
        retry_interval = ?policy.retry_interval,
        max_attempts = ?policy.max_attempts,
        max_duration = ?policy.max_duration,
        "Acquisition policy"
    );
    let handler = RequestHandler::new(
        Arc::new(market),
        ReplyDispatcher::new(Arc::clone(&broker)),
        policy,
    )
    .with_requeue_malformed(config.acquisition.requeue_malformed);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let intake = RequestIntake::new(
        config.redpanda.requests_queue.as_str(),
        broker,
        handler,
        shutdown_rx,
    )
    .with_max_in_flight(config.acquisition.max_in_flight)
    .with_shutdown_grace(Duration::from_secs(config.server.shutdown_timeout));

    let mut state = AppState::new(intake.status());
    if let Some(handle) = exporter.handle() {
        state = state.with_metrics(handle.clone());
    }
    let intake_handle = intake.spawn();

    info!(address = %config.bind_address(), "🛒 Market service listening");
    let mut server_shutdown = shutdown_tx.subscribe();
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    let served = axum::serve(listener, market_web::router(state))
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        })
        .await;

    // Stop the intake whether the server exited on a signal or on an error.
    let _ = shutdown_tx.send(());
    if let Err(e) = intake_handle.await {
        error!(error = %e, "Request intake task failed");
    }
    info!("Market service stopped");

    served.context("HTTP server failed")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
