//! Per-delivery processing: parse, acquire, reply, settle.
//!
//! Ordering within one delivery is strict. The ack is only issued after the
//! reply send has been confirmed, so a crash between the two at worst causes
//! a duplicate reply after redelivery, never a lost request.
//!
//! | result                         | settlement              |
//! |--------------------------------|-------------------------|
//! | reply sent                     | ack                     |
//! | dispatch/encode failure, panic | nack, requeue           |
//! | malformed / no reply address   | nack, no requeue        |
//! |   … with `requeue_malformed`   | nack, requeue           |

use crate::acquisition::acquire;
use crate::dispatcher::ReplyDispatcher;
use crate::error::HandlingError;
use crate::metrics::IntakeMetrics;
use crate::policy::AcquisitionPolicy;
use futures::FutureExt;
use market_core::{AcquisitionOutcome, AcquisitionRequest, AvailabilitySource, Delivery, DeliveryEnvelope};
use std::any::Any;
use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Payload bytes included in the log line of an unusable message.
const LOGGED_PAYLOAD_BYTES: usize = 256;

/// Terminal decision taken for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The delivery was acknowledged.
    Acked,
    /// The delivery was negatively acknowledged.
    Nacked {
        /// Whether the broker was asked to redeliver it.
        requeue: bool,
    },
}

/// Handles one delivery end to end.
#[derive(Clone)]
pub struct RequestHandler {
    source: Arc<dyn AvailabilitySource>,
    dispatcher: ReplyDispatcher,
    policy: AcquisitionPolicy,
    requeue_malformed: bool,
}

impl RequestHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(
        source: Arc<dyn AvailabilitySource>,
        dispatcher: ReplyDispatcher,
        policy: AcquisitionPolicy,
    ) -> Self {
        Self {
            source,
            dispatcher,
            policy,
            requeue_malformed: false,
        }
    }

    /// Requeue malformed messages instead of discarding them.
    ///
    /// A permanently unparsable message is then redelivered forever.
    #[must_use]
    pub const fn with_requeue_malformed(mut self, requeue: bool) -> Self {
        self.requeue_malformed = requeue;
        self
    }

    /// The acquisition policy in use.
    #[must_use]
    pub const fn policy(&self) -> &AcquisitionPolicy {
        &self.policy
    }

    /// Process `delivery` and settle it exactly once.
    pub async fn handle(&self, delivery: Delivery) -> Settlement {
        IntakeMetrics::record_received();
        let result = AssertUnwindSafe(self.process(delivery.envelope()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlingError::Panicked(panic_message(&*panic))));

        let settlement = match &result {
            Ok(_) => Settlement::Acked,
            Err(error) if error.is_poison() => {
                IntakeMetrics::record_malformed();
                tracing::error!(
                    error = %error,
                    requeue = self.requeue_malformed,
                    payload = %payload_preview(&delivery.envelope().payload),
                    payload_len = delivery.envelope().payload.len(),
                    "Unusable request message"
                );
                Settlement::Nacked { requeue: self.requeue_malformed }
            }
            Err(error) => {
                tracing::error!(error = %error, "Request processing failed, requeueing");
                Settlement::Nacked { requeue: true }
            }
        };

        let settled = match settlement {
            Settlement::Acked => {
                IntakeMetrics::record_ack();
                delivery.ack().await
            }
            Settlement::Nacked { requeue } => {
                IntakeMetrics::record_nack(requeue);
                delivery.nack(requeue).await
            }
        };
        if let Err(error) = settled {
            tracing::warn!(error = %error, ?settlement, "Failed to settle delivery, broker will redeliver");
        }

        settlement
    }

    async fn process(&self, envelope: &DeliveryEnvelope) -> Result<AcquisitionOutcome, HandlingError> {
        let request = AcquisitionRequest::from_slice(&envelope.payload)?;
        let reply_to = envelope
            .reply_to
            .as_deref()
            .ok_or(HandlingError::MissingReplyDestination)?;

        let span = tracing::info_span!(
            "request",
            order_id = %request.order_id,
            ingredient = %request.ingredient,
            quantity = request.quantity,
        );

        async {
            tracing::info!(redelivered = envelope.redelivered, reply_to, "Purchase request received");
            if request.quantity == 0 {
                tracing::warn!("Zero quantity requested, replying without polling");
            }

            let outcome = acquire(&*self.source, &request.ingredient, request.quantity, &self.policy).await;
            self.dispatcher
                .dispatch(reply_to, envelope.correlation_id.as_ref(), &outcome)
                .await?;
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}

fn payload_preview(payload: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(&payload[..payload.len().min(LOGGED_PAYLOAD_BYTES)])
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
