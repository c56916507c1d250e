//! In-memory message broker for fast, deterministic tests.
//!
//! Each queue is an unbounded channel. Consumers of the same queue compete
//! for deliveries. A nack with requeue puts the message back at the tail of
//! its queue, marked as redelivered.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use market_core::{
    Acknowledger, BrokerError, Delivery, DeliveryEnvelope, DeliveryStream, MessageBroker,
    OutboundMessage,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementKind {
    /// Acknowledged
    Ack,
    /// Negatively acknowledged
    Nack {
        /// Whether the message was put back on its queue
        requeue: bool,
    },
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DeliveryEnvelope>>>;

struct Queue {
    tx: mpsc::UnboundedSender<DeliveryEnvelope>,
    rx: SharedReceiver,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    sent: Vec<(String, OutboundMessage)>,
    settlements: Vec<SettlementKind>,
    fail_sends: bool,
    unreachable: bool,
    failing_consumes: usize,
    consume_calls: usize,
}

/// In-memory broker.
///
/// Cheap to clone; clones share queues and recordings.
///
/// # Example
///
/// ```
/// use market_core::{DeliveryEnvelope, MessageBroker, OutboundMessage};
/// use market_testing::{InMemoryBroker, SettlementKind};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let delivery = broker.delivery("market_requests", DeliveryEnvelope::new(b"{}".to_vec()));
///
/// broker.send("replies", &OutboundMessage::new(b"ok".to_vec(), None)).await?;
/// delivery.ack().await?;
///
/// assert_eq!(broker.sent_to("replies").len(), 1);
/// assert_eq!(broker.settlement_kinds(), vec![SettlementKind::Ack]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    settled: Arc<Notify>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message on `queue` for consumers.
    pub fn publish(&self, queue: &str, envelope: DeliveryEnvelope) {
        let mut state = self.state.lock().unwrap();
        let queue = state.queues.entry(queue.to_string()).or_insert_with(Queue::new);
        // The broker holds a receiver, so the send cannot fail.
        let _ = queue.tx.send(envelope);
    }

    /// Wrap `envelope` as a delivery from `queue` without going through a
    /// consumer. Settling it is recorded like any consumed delivery.
    #[must_use]
    pub fn delivery(&self, queue: &str, envelope: DeliveryEnvelope) -> Delivery {
        let acker = InMemoryAcker {
            broker: self.clone(),
            queue: queue.to_string(),
            envelope: envelope.clone(),
        };
        Delivery::new(envelope, acker)
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Make `connect` fail, as if the cluster were down.
    pub fn unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Make the next `count` calls to `consume` fail.
    pub fn fail_next_consumes(&self, count: usize) {
        self.state.lock().unwrap().failing_consumes = count;
    }

    /// Number of `consume` calls so far, failed ones included.
    #[must_use]
    pub fn consume_calls(&self) -> usize {
        self.state.lock().unwrap().consume_calls
    }

    /// Messages successfully sent to `destination`, in send order.
    #[must_use]
    pub fn sent_to(&self, destination: &str) -> Vec<OutboundMessage> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(dest, _)| dest == destination)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Every settlement so far, in the order they happened.
    #[must_use]
    pub fn settlement_kinds(&self) -> Vec<SettlementKind> {
        self.state.lock().unwrap().settlements.clone()
    }

    /// Number of acks so far.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.count(|kind| kind == SettlementKind::Ack)
    }

    /// Number of nacks so far, with or without requeue.
    #[must_use]
    pub fn nack_count(&self) -> usize {
        self.count(|kind| matches!(kind, SettlementKind::Nack { .. }))
    }

    /// Wait until at least `count` deliveries have been settled.
    pub async fn wait_for_settlements(&self, count: usize) {
        loop {
            let notified = self.settled.notified();
            if self.state.lock().unwrap().settlements.len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn count(&self, predicate: impl Fn(SettlementKind) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .settlements
            .iter()
            .filter(|kind| predicate(**kind))
            .count()
    }

    fn record(&self, kind: SettlementKind) {
        self.state.lock().unwrap().settlements.push(kind);
        self.settled.notify_waiters();
    }

    fn receiver(&self, queue: &str) -> Result<SharedReceiver, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.consume_calls += 1;
        if state.failing_consumes > 0 {
            state.failing_consumes -= 1;
            return Err(BrokerError::SubscriptionFailed {
                queue: queue.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let queue = state.queues.entry(queue.to_string()).or_insert_with(Queue::new);
        Ok(Arc::clone(&queue.rx))
    }
}

impl MessageBroker for InMemoryBroker {
    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let rx = self.receiver(&queue)?;
            let broker = self.clone();

            let stream = async_stream::stream! {
                loop {
                    let next = rx.lock().await.recv().await;
                    match next {
                        Some(envelope) => yield Ok(broker.delivery(&queue, envelope)),
                        None => break,
                    }
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn send(
        &self,
        destination: &str,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let destination = destination.to_string();
        let message = message.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_sends {
                return Err(BrokerError::SendFailed {
                    destination,
                    reason: "injected failure".to_string(),
                });
            }
            state.sent.push((destination, message));
            Ok(())
        })
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.state.lock().unwrap().unreachable {
                return Err(BrokerError::ConnectionFailed("injected failure".to_string()));
            }
            Ok(())
        })
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    queue: String,
    envelope: DeliveryEnvelope,
}

impl Acknowledger for InMemoryAcker {
    fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.broker.record(SettlementKind::Ack);
            Ok(())
        })
    }

    fn nack(
        &self,
        requeue: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if requeue {
                self.broker
                    .publish(&self.queue, self.envelope.clone().redelivered(true));
            }
            self.broker.record(SettlementKind::Nack { requeue });
            Ok(())
        })
    }
}
