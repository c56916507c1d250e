//! Startup failure paths.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use market_service::Config;
use market_testing::InMemoryBroker;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn unreachable_broker_aborts_startup() {
    let config = Config::from_lookup(|key| match key {
        "PORT" => Some("0".to_string()),
        "REDPANDA_BROKERS" => Some("127.0.0.1:1".to_string()),
        _ => None,
    })
    .unwrap();
    let broker = InMemoryBroker::new();
    broker.unreachable(true);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        market_service::start(config, Arc::new(broker.clone())),
    )
    .await
    .unwrap();

    let error = result.unwrap_err();
    assert!(format!("{error:#}").contains("Failed to connect to broker at 127.0.0.1:1"));
    assert_eq!(broker.consume_calls(), 0);
}
