//! Message broker abstraction for request intake and replies.
//!
//! This module provides the [`MessageBroker`] trait: consume deliveries from a
//! named queue and send messages to a named destination. Each consumed message
//! arrives as a [`Delivery`], which must be settled exactly once with
//! [`Delivery::ack`] or [`Delivery::nack`].
//!
//! # Delivery Semantics
//!
//! **At-least-once**: a message stays owned by the broker until it is acked.
//! A nack with `requeue = true` hands it back for redelivery; a crash before
//! settlement has the same effect. Handlers must therefore tolerate
//! duplicates.
//!
//! ```text
//! consume(queue) ──► Delivery ──► handler ──► send(reply_to, reply)
//!                                   │
//!                         ┌─────────┴─────────┐
//!                         ▼                   ▼
//!                    ack (done)     nack(requeue) (redeliver)
//! ```
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `market-testing` (tests, records every settlement)
//! - `RedpandaBroker` in `market-redpanda` (Kafka-compatible)

use crate::envelope::{DeliveryEnvelope, OutboundMessage};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to start consuming from a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to send a message
    #[error("Send failed for destination '{destination}': {reason}")]
    SendFailed {
        /// The destination that failed
        destination: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to settle a delivery
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Broker-side handle that settles one delivery.
///
/// Implementations are only ever called once per delivery; [`Delivery`]
/// guarantees that by consuming itself on settlement.
pub trait Acknowledger: Send + Sync {
    /// Permanently remove the message from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the ack.
    fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Reject the message. With `requeue` it is redelivered later, without it
    /// it is discarded or dead-lettered, depending on the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the nack.
    fn nack(
        &self,
        requeue: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

/// One inbound message awaiting settlement.
pub struct Delivery {
    envelope: DeliveryEnvelope,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// Pair an envelope with the handle that settles it.
    #[must_use]
    pub fn new(envelope: DeliveryEnvelope, acker: impl Acknowledger + 'static) -> Self {
        Self {
            envelope,
            acker: Some(Box::new(acker)),
        }
    }

    /// The message and its transport properties.
    #[must_use]
    pub const fn envelope(&self) -> &DeliveryEnvelope {
        &self.envelope
    }

    /// Acknowledge the message.
    ///
    /// # Errors
    ///
    /// Propagates the broker's [`BrokerError`].
    pub async fn ack(mut self) -> Result<(), BrokerError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Negatively acknowledge the message.
    ///
    /// # Errors
    ///
    /// Propagates the broker's [`BrokerError`].
    pub async fn nack(mut self, requeue: bool) -> Result<(), BrokerError> {
        match self.acker.take() {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.acker.is_some() {
            tracing::warn!(
                correlation_id = ?self.envelope.correlation_id,
                "Delivery dropped without ack or nack, broker will redeliver"
            );
        }
    }
}

/// Stream of deliveries from a consumed queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Trait for message broker implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`: concurrently running request
/// handlers send replies and settle deliveries through the same broker.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so the intake can hold an `Arc<dyn MessageBroker>`.
pub trait MessageBroker: Send + Sync {
    /// Start consuming deliveries from `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the queue cannot be consumed.
    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>>;

    /// Send `message` to `destination`. Resolves once the broker has
    /// confirmed the message is enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SendFailed`] if the broker does not accept the message.
    fn send(
        &self,
        destination: &str,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Check that the broker is reachable.
    ///
    /// Called once at startup so an unreachable cluster fails fast instead of
    /// leaving the worker idle. The default reports success.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the broker cannot be reached.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Flush outstanding sends before the process exits.
    ///
    /// The default does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportError`] if pending messages could not
    /// be delivered.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Acknowledger for Recorder {
        fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            self.0.lock().unwrap().push("ack".to_string());
            Box::pin(async { Ok(()) })
        }

        fn nack(
            &self,
            requeue: bool,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            self.0.lock().unwrap().push(format!("nack:{requeue}"));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn ack_settles_once() {
        let recorder = Recorder::default();
        let delivery = Delivery::new(DeliveryEnvelope::new(b"{}".to_vec()), recorder.clone());
        delivery.ack().await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["ack"]);
    }

    #[tokio::test]
    async fn nack_forwards_requeue_flag() {
        let recorder = Recorder::default();
        let delivery = Delivery::new(DeliveryEnvelope::new(b"{}".to_vec()), recorder.clone());
        delivery.nack(true).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["nack:true"]);
    }

    #[test]
    fn dropping_does_not_settle() {
        let recorder = Recorder::default();
        drop(Delivery::new(DeliveryEnvelope::new(Vec::new()), recorder.clone()));
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn broker_error_messages() {
        let err = BrokerError::SendFailed {
            destination: "replies".to_string(),
            reason: "queue full".to_string(),
        };
        assert_eq!(err.to_string(), "Send failed for destination 'replies': queue full");
    }
}
