//! Error types for the market API client

use market_core::AvailabilityError;
use thiserror::Error;

/// Errors that can occur when calling the market API
#[derive(Debug, Error)]
pub enum MarketClientError {
    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    /// HTTP request failed (connection, timeout, ...)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The API answered with a non-success status
    #[error("API error (status {status}): {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Response parsing failed
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),
}

impl From<MarketClientError> for AvailabilityError {
    fn from(error: MarketClientError) -> Self {
        match error {
            MarketClientError::Build(reason) | MarketClientError::RequestFailed(reason) => {
                Self::RequestFailed(reason)
            }
            MarketClientError::Status { status, body } => Self::Status { status, body },
            MarketClientError::ResponseParseFailed(reason) => Self::ResponseParseFailed(reason),
        }
    }
}
