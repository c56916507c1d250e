//! Market Service Server
//!
//! # Usage
//!
//! ```bash
//! # Needs a Kafka-compatible broker on REDPANDA_BROKERS (default localhost:9092)
//!
//! # Run the worker
//! cargo run --bin market-service
//! ```

use market_service::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,market=debug,rdkafka=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🛒 Starting Market Service...");

    let config = Config::from_env()?;
    tracing::info!(
        brokers = %config.redpanda.brokers,
        queue = %config.redpanda.requests_queue,
        market = %config.market.api_url,
        max_in_flight = config.acquisition.max_in_flight,
        "Configuration loaded"
    );

    if let Err(e) = market_service::run(config).await {
        tracing::error!(error = %format!("{e:#}"), "Market service failed");
        return Err(e);
    }
    Ok(())
}
