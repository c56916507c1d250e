//! Errors raised while handling one delivery.

use market_core::{BrokerError, CodecError};
use thiserror::Error;

/// Why a delivery could not be answered.
///
/// The variants split in two groups: *poison* errors (the message itself is
/// unusable and will fail the same way on every redelivery) and transient
/// errors (worth a requeue).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlingError {
    /// The payload is not a valid request.
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// The message names no reply destination.
    #[error("Request has no reply destination")]
    MissingReplyDestination,

    /// The outcome could not be encoded.
    #[error("Failed to encode reply: {0}")]
    Encode(String),

    /// The reply could not be sent.
    #[error("Reply dispatch failed: {0}")]
    Dispatch(#[from] BrokerError),

    /// Processing panicked before a reply was sent.
    #[error("Request processing panicked: {0}")]
    Panicked(String),
}

impl HandlingError {
    /// `true` if redelivering the same message cannot succeed.
    #[must_use]
    pub const fn is_poison(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::MissingReplyDestination)
    }
}

impl From<CodecError> for HandlingError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Malformed(reason) => Self::Malformed(reason),
            CodecError::Encode(reason) => Self::Encode(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(HandlingError::Malformed("eof".to_string()).is_poison());
        assert!(HandlingError::MissingReplyDestination.is_poison());
        assert!(!HandlingError::Encode("nan".to_string()).is_poison());
        assert!(!HandlingError::Dispatch(BrokerError::TransportError("down".to_string())).is_poison());
        assert!(!HandlingError::Panicked("boom".to_string()).is_poison());
    }

    #[test]
    fn codec_errors_map_by_kind() {
        let malformed: HandlingError = CodecError::Malformed("eof".to_string()).into();
        assert!(malformed.is_poison());
        let encode: HandlingError = CodecError::Encode("nan".to_string()).into();
        assert!(!encode.is_poison());
    }
}
