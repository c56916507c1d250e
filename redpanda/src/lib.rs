//! Redpanda message broker for the market procurement worker.
//!
//! Implements [`MessageBroker`] over rdkafka, so the worker runs against
//! Redpanda, Apache Kafka, or any other Kafka-compatible cluster.
//!
//! # Queue Semantics on a Log
//!
//! A Kafka topic is a log, not a queue, so the queue operations are mapped
//! as follows:
//!
//! | queue operation     | Kafka                                                  |
//! |---------------------|--------------------------------------------------------|
//! | consume             | consumer group subscription, manual offset commits     |
//! | reply destination   | `reply_to` record header                               |
//! | correlation token   | `correlation_id` record header                         |
//! | ack                 | commit the offset                                      |
//! | nack, requeue       | re-publish to the same topic (`redelivered`), commit   |
//! | nack, no requeue    | publish to the dead letter topic if configured, commit |
//!
//! # Delivery Semantics
//!
//! **At-least-once**: an offset is committed only once every earlier offset
//! of the same partition has been settled (see [`OffsetTracker`]). A crash
//! replays everything after the last commit, so requests may be processed
//! twice.
//!
//! # Example
//!
//! ```no_run
//! use market_redpanda::RedpandaBroker;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("market-service")
//!     .dead_letter_queue("market_requests.dlq")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod headers;
pub mod offsets;

pub use offsets::OffsetTracker;

use market_core::{
    Acknowledger, BrokerError, Delivery, DeliveryEnvelope, DeliveryStream, MessageBroker,
    OutboundMessage,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Redpanda-backed [`MessageBroker`].
///
/// One producer is shared by replies, requeues and dead-lettering. Each call
/// to [`MessageBroker::consume`] creates its own consumer in the configured
/// group.
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    consumer_group: String,
    dead_letter_queue: Option<String>,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for subscriptions.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    consumer_group: Option<String>,
    dead_letter_queue: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// Instances sharing a group split the request partitions between them.
    ///
    /// Default: `market-service`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Publish discarded deliveries to this topic instead of dropping them.
    #[must_use]
    pub fn dead_letter_queue(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_queue = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many deliveries may wait between the consumer and the intake.
    ///
    /// Default: 100. Values below one are raised to one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where a new consumer group starts reading: "earliest" or "latest".
    ///
    /// Default: "earliest", so requests published before the first start
    /// are still served.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| "market-service".to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());
        let buffer_size = self.buffer_size.unwrap_or(100);

        tracing::info!(
            brokers = %brokers,
            consumer_group = %consumer_group,
            dead_letter_queue = ?self.dead_letter_queue,
            acks,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            consumer_group,
            dead_letter_queue: self.dead_letter_queue,
            timeout,
            buffer_size,
            auto_offset_reset,
        })
    }
}

async fn produce(
    producer: &FutureProducer,
    topic: &str,
    payload: &[u8],
    headers: OwnedHeaders,
    timeout: Duration,
) -> Result<(), BrokerError> {
    let record = FutureRecord::<(), [u8]>::to(topic)
        .payload(payload)
        .headers(headers);

    match producer.send(record, Timeout::After(timeout)).await {
        Ok((partition, offset)) => {
            tracing::debug!(topic, partition, offset, "Record produced");
            Ok(())
        }
        Err((kafka_error, _)) => Err(BrokerError::SendFailed {
            destination: topic.to_string(),
            reason: kafka_error.to_string(),
        }),
    }
}

impl MessageBroker for RedpandaBroker {
    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let subscription_failed = |reason: String| BrokerError::SubscriptionFailed {
                queue: queue.clone(),
                reason,
            };

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &self.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[queue.as_str()])
                .map_err(|e| subscription_failed(format!("Failed to subscribe: {e}")))?;

            // Subscribing is lazy; only report success once the cluster answers.
            let consumer = Arc::new(consumer);
            let subscribed = Arc::clone(&consumer);
            let topic = queue.clone();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || {
                subscribed
                    .fetch_metadata(Some(topic.as_str()), timeout)
                    .map(|_| ())
            })
            .await
            .map_err(|e| subscription_failed(format!("Metadata task failed: {e}")))?
            .map_err(|e| subscription_failed(format!("Broker unreachable: {e}")))?;

            tracing::info!(
                queue = %queue,
                consumer_group = %self.consumer_group,
                manual_commit = true,
                "Subscribed to request topic"
            );

            let settlement = Settlement {
                consumer,
                producer: self.producer.clone(),
                tracker: Arc::new(Mutex::new(OffsetTracker::new())),
                dead_letter_queue: self.dead_letter_queue.clone(),
                timeout: self.timeout,
            };
            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;

                let consumer = Arc::clone(&settlement.consumer);
                let mut stream = consumer.stream();

                while let Some(received) = stream.next().await {
                    let delivery = match received {
                        Ok(message) => {
                            let envelope =
                                headers::envelope_from_record(message.payload(), message.headers());
                            let position = Position {
                                topic: message.topic().to_string(),
                                partition: message.partition(),
                                offset: message.offset(),
                            };
                            tracing::trace!(
                                topic = %position.topic,
                                partition = position.partition,
                                offset = position.offset,
                                "Received request record"
                            );
                            Ok(settlement.delivery(envelope, position))
                        }
                        Err(e) => Err(BrokerError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };

                    if tx.send(delivery).await.is_err() {
                        tracing::debug!("Delivery receiver dropped, exiting consumer task");
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(delivery) = rx.recv().await {
                    yield delivery;
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
            produce(
                &self.producer,
                &destination,
                &message.payload,
                headers::reply_headers(&message),
                self.timeout,
            )
            .await
        })
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let (cluster_brokers, topics) = tokio::task::spawn_blocking(move || {
                producer
                    .client()
                    .fetch_metadata(None, timeout)
                    .map(|metadata| (metadata.brokers().len(), metadata.topics().len()))
            })
            .await
            .map_err(|e| BrokerError::ConnectionFailed(format!("Metadata task failed: {e}")))?
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to reach {}: {e}", self.brokers))
            })?;

            tracing::info!(
                brokers = %self.brokers,
                cluster_brokers,
                topics,
                "Connected to Redpanda"
            );
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| BrokerError::TransportError(format!("Flush task failed: {e}")))?
                .map_err(|e| BrokerError::TransportError(format!("Failed to flush producer: {e}")))
        })
    }
}

/// Shared state every delivery of one subscription settles through.
#[derive(Clone)]
struct Settlement {
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    tracker: Arc<Mutex<OffsetTracker>>,
    dead_letter_queue: Option<String>,
    timeout: Duration,
}

impl Settlement {
    fn delivery(&self, envelope: DeliveryEnvelope, position: Position) -> Delivery {
        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.track(&position.topic, position.partition, position.offset);
        }
        let acker = RecordAcker {
            settlement: self.clone(),
            envelope: envelope.clone(),
            position,
        };
        Delivery::new(envelope, acker)
    }

    fn commit(&self, position: &Position) -> Result<(), BrokerError> {
        let next = self
            .tracker
            .lock()
            .map_err(|_| BrokerError::AckFailed("Offset tracker poisoned".to_string()))?
            .settle(&position.topic, position.partition, position.offset);

        let Some(next) = next else {
            return Ok(());
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&position.topic, position.partition, Offset::Offset(next))
            .map_err(|e| BrokerError::AckFailed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::AckFailed(format!("Failed to commit offset {next}: {e}")))
    }
}

struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

struct RecordAcker {
    settlement: Settlement,
    envelope: DeliveryEnvelope,
    position: Position,
}

impl Acknowledger for RecordAcker {
    fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move { self.settlement.commit(&self.position) })
    }

    fn nack(
        &self,
        requeue: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let destination = if requeue {
                Some(self.position.topic.as_str())
            } else {
                self.settlement.dead_letter_queue.as_deref()
            };

            if let Some(destination) = destination {
                // A failed re-publish leaves the offset uncommitted; the
                // record is replayed after the next restart or rebalance.
                produce(
                    &self.settlement.producer,
                    destination,
                    &self.envelope.payload,
                    headers::requeue_headers(&self.envelope),
                    self.settlement.timeout,
                )
                .await
                .map_err(|e| BrokerError::AckFailed(format!("Nack re-publish failed: {e}")))?;

                tracing::debug!(
                    destination,
                    offset = self.position.offset,
                    requeue,
                    "Re-published nacked record"
                );
            }

            self.settlement.commit(&self.position)
        })
    }
}
