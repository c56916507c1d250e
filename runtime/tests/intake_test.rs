//! Integration tests for the request intake: consumption, bounded
//! concurrency, settlement and shutdown.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use market_core::{
    AcquisitionRequest, AvailabilityError, AvailabilitySource, CorrelationToken, DeliveryEnvelope,
    Grant,
};
use market_runtime::{
    AcquisitionPolicy, HealthStatus, ReplyDispatcher, RequestHandler, RequestIntake,
};
use market_testing::{InMemoryBroker, ScriptedSource, SettlementKind};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const QUEUE: &str = "market_requests";

fn intake(
    broker: &InMemoryBroker,
    source: &ScriptedSource,
    shutdown: broadcast::Receiver<()>,
) -> RequestIntake {
    let handler = RequestHandler::new(
        Arc::new(source.clone()),
        ReplyDispatcher::new(Arc::new(broker.clone())),
        AcquisitionPolicy::default(),
    );
    RequestIntake::new(QUEUE, Arc::new(broker.clone()), handler, shutdown)
        .with_reconnect_delay(Duration::from_secs(1))
}

fn publish(broker: &InMemoryBroker, order_id: &str, ingredient: &str, quantity: u64) {
    let payload = AcquisitionRequest::new(order_id, ingredient, quantity)
        .to_vec()
        .unwrap();
    broker.publish(
        QUEUE,
        DeliveryEnvelope::new(payload)
            .with_reply_to(format!("replies.{ingredient}"))
            .with_correlation_id(order_id),
    );
}

fn reply_body(broker: &InMemoryBroker, ingredient: &str) -> serde_json::Value {
    let sent = broker.sent_to(&format!("replies.{ingredient}"));
    assert_eq!(sent.len(), 1, "expected exactly one reply for {ingredient}");
    serde_json::from_slice(&sent[0].payload).unwrap()
}

#[tokio::test(start_paused = true)]
async fn every_request_is_answered_and_acked_once() {
    let broker = InMemoryBroker::new();
    let source = ScriptedSource::new()
        .script("tomato", [Ok(1), Ok(1)])
        .script("onion", [Ok(0), Ok(0), Ok(4)])
        .script("rice", [Ok(5)]);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = intake(&broker, &source, shutdown_rx).spawn();

    publish(&broker, "ord-1", "tomato", 2);
    publish(&broker, "ord-2", "onion", 3);
    publish(&broker, "ord-3", "rice", 5);
    broker.wait_for_settlements(3).await;

    assert_eq!(broker.ack_count(), 3);
    assert_eq!(broker.nack_count(), 0);
    assert_eq!(reply_body(&broker, "tomato"), serde_json::json!({"ingredient": "tomato", "quantity": 2}));
    assert_eq!(reply_body(&broker, "onion"), serde_json::json!({"ingredient": "onion", "quantity": 4}));
    assert_eq!(reply_body(&broker, "rice"), serde_json::json!({"ingredient": "rice", "quantity": 5}));
    assert_eq!(
        broker.sent_to("replies.onion")[0].correlation_id,
        Some(CorrelationToken::from("ord-2"))
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_max_in_flight() {
    let broker = InMemoryBroker::new();
    let source = ScriptedSource::new()
        .with_fallback(Ok(1))
        .with_latency(Duration::from_secs(1));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = intake(&broker, &source, shutdown_rx)
        .with_max_in_flight(3)
        .spawn();

    for i in 0..10 {
        publish(&broker, &format!("ord-{i}"), &format!("item-{i}"), 1);
    }
    broker.wait_for_settlements(10).await;

    assert_eq!(broker.ack_count(), 10);
    assert_eq!(source.peak_concurrency(), 3);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn saturated_intake_stops_pulling_and_reports_degraded() {
    let broker = InMemoryBroker::new();
    let source = ScriptedSource::new().stall("meat");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let intake = intake(&broker, &source, shutdown_rx)
        .with_max_in_flight(2)
        .with_shutdown_grace(Duration::from_secs(5));
    let status = intake.status();
    let handle = intake.spawn();

    for i in 0..4 {
        publish(&broker, &format!("ord-{i}"), "meat", 1);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(source.total_calls(), 2);
    assert_eq!(status.in_flight(), 2);
    assert_eq!(status.health().status, HealthStatus::Degraded);

    let stopping = Instant::now();
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    // Aborted handlers leave their deliveries unsettled for redelivery.
    assert_eq!(stopping.elapsed(), Duration::from_secs(5));
    assert!(broker.settlement_kinds().is_empty());
    assert_eq!(status.in_flight(), 0);
    assert_eq!(status.health().status, HealthStatus::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn failed_reply_is_requeued_then_answered() {
    let broker = InMemoryBroker::new();
    broker.fail_sends(true);
    let source = ScriptedSource::new().with_fallback(Ok(1));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = intake(&broker, &source, shutdown_rx).spawn();

    publish(&broker, "ord-1", "garlic", 1);
    broker.wait_for_settlements(1).await;
    broker.fail_sends(false);
    while broker.ack_count() == 0 {
        let seen = broker.settlement_kinds().len();
        broker.wait_for_settlements(seen + 1).await;
    }

    let kinds = broker.settlement_kinds();
    assert_eq!(kinds[0], SettlementKind::Nack { requeue: true });
    assert_eq!(kinds.last(), Some(&SettlementKind::Ack));
    assert_eq!(broker.ack_count(), 1);
    assert_eq!(reply_body(&broker, "garlic"), serde_json::json!({"ingredient": "garlic", "quantity": 1}));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn malformed_request_does_not_block_the_queue() {
    let broker = InMemoryBroker::new();
    let source = ScriptedSource::new().with_fallback(Ok(2));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = intake(&broker, &source, shutdown_rx).spawn();

    broker.publish(
        QUEUE,
        DeliveryEnvelope::new(br#"{"orderId": 1, "ingredient": "egg"}"#.to_vec())
            .with_reply_to("replies.egg"),
    );
    publish(&broker, "ord-2", "milk", 2);
    broker.wait_for_settlements(2).await;

    let kinds = broker.settlement_kinds();
    assert!(kinds.contains(&SettlementKind::Nack { requeue: false }));
    assert!(kinds.contains(&SettlementKind::Ack));
    assert!(broker.sent_to("replies.egg").is_empty());
    assert_eq!(reply_body(&broker, "milk")["quantity"], 2);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn resubscribes_after_consume_failure() {
    let broker = InMemoryBroker::new();
    broker.fail_next_consumes(2);
    let source = ScriptedSource::new().with_fallback(Ok(1));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let intake = intake(&broker, &source, shutdown_rx);
    let status = intake.status();
    let handle = intake.spawn();

    publish(&broker, "ord-1", "lemon", 1);
    broker.wait_for_settlements(1).await;

    assert_eq!(broker.consume_calls(), 3);
    assert!(status.is_consuming());
    assert_eq!(broker.ack_count(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn not_consuming_while_subscription_fails() {
    let broker = InMemoryBroker::new();
    broker.fail_next_consumes(usize::MAX);
    let source = ScriptedSource::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let intake = intake(&broker, &source, shutdown_rx);
    let status = intake.status();
    let handle = intake.spawn();

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(broker.consume_calls() > 1);
    assert!(!status.is_consuming());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

/// Panics on its first call, then sells one unit per call.
#[derive(Default)]
struct FlakySource {
    panicked: AtomicBool,
}

impl AvailabilitySource for FlakySource {
    #[allow(clippy::panic)]
    fn acquire(
        &self,
        _ingredient: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Grant, AvailabilityError>> + Send + '_>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("scale overflowed");
        }
        Box::pin(async { Ok(1) })
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_requeues_its_delivery() {
    let broker = InMemoryBroker::new();
    let handler = RequestHandler::new(
        Arc::new(FlakySource::default()),
        ReplyDispatcher::new(Arc::new(broker.clone())),
        AcquisitionPolicy::default(),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = RequestIntake::new(QUEUE, Arc::new(broker.clone()), handler, shutdown_rx).spawn();

    publish(&broker, "ord-1", "sugar", 1);
    tokio::time::timeout(Duration::from_secs(60), broker.wait_for_settlements(2))
        .await
        .unwrap();

    assert_eq!(
        broker.settlement_kinds(),
        vec![SettlementKind::Nack { requeue: true }, SettlementKind::Ack]
    );
    assert_eq!(reply_body(&broker, "sugar")["quantity"], 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_in_flight_requests_finish() {
    let broker = InMemoryBroker::new();
    let source = ScriptedSource::new()
        .with_fallback(Ok(1))
        .with_latency(Duration::from_secs(3));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = intake(&broker, &source, shutdown_rx).spawn();

    publish(&broker, "ord-1", "butter", 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(broker.settlement_kinds(), vec![SettlementKind::Ack]);
    assert_eq!(reply_body(&broker, "butter")["quantity"], 1);
}
