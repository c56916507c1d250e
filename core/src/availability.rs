//! The external supply seam.
//!
//! An [`AvailabilitySource`] answers one question: how many units of this
//! ingredient can be bought right now? Zero is a normal answer. A failed call
//! is an infrastructure problem, not a supply signal, and callers are expected
//! to keep the two apart in their logs even when they react the same way.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Quantity granted by a single call to the source.
pub type Grant = u64;

/// Errors returned by an availability source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The source answered with a non-success status.
    #[error("Source returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The response body could not be understood.
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),
}

/// Something that can be polled for supply of an ingredient.
///
/// # Dyn Compatibility
///
/// Like [`MessageBroker`](crate::MessageBroker), this trait returns
/// `Pin<Box<dyn Future>>` so it can be shared as `Arc<dyn AvailabilitySource>`
/// across request handlers.
pub trait AvailabilitySource: Send + Sync {
    /// Try to buy `ingredient`, returning the quantity granted by this call.
    ///
    /// # Errors
    ///
    /// Returns an [`AvailabilityError`] on transport or protocol failure.
    fn acquire(
        &self,
        ingredient: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Grant, AvailabilityError>> + Send + '_>>;
}

impl<T: AvailabilitySource + ?Sized> AvailabilitySource for Arc<T> {
    fn acquire(
        &self,
        ingredient: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Grant, AvailabilityError>> + Send + '_>> {
        (**self).acquire(ingredient)
    }
}
