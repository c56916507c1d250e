//! Reply dispatch.
//!
//! Sends an [`AcquisitionOutcome`] to the reply destination named by the
//! original request, carrying the request's correlation token unchanged.
//! Failures are returned to the caller; nothing is retried here, retries
//! happen through message requeue.

use crate::error::HandlingError;
use market_core::{AcquisitionOutcome, CorrelationToken, MessageBroker, OutboundMessage};
use std::sync::Arc;

/// Sends outcomes back to requesters.
#[derive(Clone)]
pub struct ReplyDispatcher {
    broker: Arc<dyn MessageBroker>,
}

impl ReplyDispatcher {
    /// Create a dispatcher sending through `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    /// Send `outcome` to `reply_to`, tagged with `correlation_id`.
    ///
    /// Resolves once the broker has confirmed the reply is enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`HandlingError::Encode`] if the outcome cannot be serialized
    /// and [`HandlingError::Dispatch`] if the broker rejects the send.
    pub async fn dispatch(
        &self,
        reply_to: &str,
        correlation_id: Option<&CorrelationToken>,
        outcome: &AcquisitionOutcome,
    ) -> Result<(), HandlingError> {
        let payload = outcome.to_vec()?;
        let message = OutboundMessage::new(payload, correlation_id.cloned());

        self.broker.send(reply_to, &message).await?;

        tracing::debug!(
            reply_to,
            correlation_id = ?correlation_id,
            ingredient = %outcome.ingredient,
            quantity = outcome.acquired_quantity,
            "Reply sent"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use market_testing::InMemoryBroker;
    use serde_json::json;

    #[tokio::test]
    async fn sends_body_and_token_to_reply_destination() {
        let broker = InMemoryBroker::new();
        let dispatcher = ReplyDispatcher::new(Arc::new(broker.clone()));
        let token = CorrelationToken::from("corr-9");

        dispatcher
            .dispatch("kitchen.replies", Some(&token), &AcquisitionOutcome::complete("tomato", 10))
            .await
            .unwrap();

        let sent = broker.sent_to("kitchen.replies");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].correlation_id, Some(token));
        let body: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(body, json!({"ingredient": "tomato", "quantity": 10}));
    }

    #[tokio::test]
    async fn surfaces_send_failures() {
        let broker = InMemoryBroker::new();
        broker.fail_sends(true);
        let dispatcher = ReplyDispatcher::new(Arc::new(broker.clone()));

        let err = dispatcher
            .dispatch("kitchen.replies", None, &AcquisitionOutcome::complete("tomato", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlingError::Dispatch(_)));
        assert!(broker.sent_to("kitchen.replies").is_empty());
    }
}
