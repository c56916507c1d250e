//! Request and reply payloads.
//!
//! Both shapes travel as JSON. The inbound body is
//! `{"orderId": .., "ingredient": .., "quantity": ..}` and the reply body is
//! `{"ingredient": .., "quantity": ..}`, where the reply quantity is the total
//! actually acquired. A reply for a request that stopped short of its target
//! additionally carries `"partial": true`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from encoding or decoding payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The inbound payload could not be parsed as a request.
    #[error("Malformed request payload: {0}")]
    Malformed(String),

    /// The reply could not be serialized.
    #[error("Failed to encode reply: {0}")]
    Encode(String),
}

/// A request to acquire `quantity` units of `ingredient`.
///
/// Immutable after receipt. `order_id` is opaque: it is only carried into
/// log fields so a request can be traced back to the order that caused it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionRequest {
    /// Order that triggered the purchase. Producers send strings or numbers.
    #[serde(deserialize_with = "opaque_id")]
    pub order_id: String,
    /// Name of the ingredient to buy.
    pub ingredient: String,
    /// Target quantity.
    pub quantity: u64,
}

impl AcquisitionRequest {
    /// Create a request.
    #[must_use]
    pub fn new(order_id: impl Into<String>, ingredient: impl Into<String>, quantity: u64) -> Self {
        Self {
            order_id: order_id.into(),
            ingredient: ingredient.into(),
            quantity,
        }
    }

    /// Parse a request from raw payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the bytes are not a JSON object
    /// with a string `ingredient` and a non-negative integer `quantity`.
    pub fn from_slice(payload: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    /// Serialize the request to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

/// Why an acquisition stopped before reaching its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartialReason {
    /// The policy's attempt ceiling was reached.
    AttemptsExhausted,
    /// The policy's deadline elapsed.
    DeadlineElapsed,
}

impl fmt::Display for PartialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted => f.write_str("attempts exhausted"),
            Self::DeadlineElapsed => f.write_str("deadline elapsed"),
        }
    }
}

/// Terminal state of an acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fulfillment {
    /// The acquired quantity reached the target.
    Complete,
    /// The loop gave up before reaching the target.
    Partial {
        /// What stopped the loop.
        reason: PartialReason,
    },
}

/// Aggregated result of one acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquisitionOutcome {
    /// Ingredient that was requested.
    pub ingredient: String,
    /// Sum of every grant observed. May exceed the target.
    pub acquired_quantity: u64,
    /// Whether the target was met.
    pub fulfillment: Fulfillment,
}

#[derive(Serialize)]
struct ReplyBody<'a> {
    ingredient: &'a str,
    quantity: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    partial: bool,
}

impl AcquisitionOutcome {
    /// Outcome for a request whose target was met.
    #[must_use]
    pub fn complete(ingredient: impl Into<String>, acquired_quantity: u64) -> Self {
        Self {
            ingredient: ingredient.into(),
            acquired_quantity,
            fulfillment: Fulfillment::Complete,
        }
    }

    /// Outcome for a request that stopped short.
    #[must_use]
    pub fn partial(
        ingredient: impl Into<String>,
        acquired_quantity: u64,
        reason: PartialReason,
    ) -> Self {
        Self {
            ingredient: ingredient.into(),
            acquired_quantity,
            fulfillment: Fulfillment::Partial { reason },
        }
    }

    /// `true` if the target was met.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.fulfillment, Fulfillment::Complete)
    }

    /// Serialize the outcome to its reply body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        let body = ReplyBody {
            ingredient: &self.ingredient,
            quantity: self.acquired_quantity,
            partial: !self.is_complete(),
        };
        serde_json::to_vec(&body).map_err(|e| CodecError::Encode(e.to_string()))
    }
}
