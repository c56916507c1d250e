//! # Market Core
//!
//! Core traits and types for the market procurement worker.
//!
//! The worker consumes purchase requests from a queue, polls an external
//! availability source until the requested quantity has been acquired, and
//! replies to the caller over a correlated reply destination.
//!
//! ## Core Concepts
//!
//! - **[`AcquisitionRequest`]**: "acquire N units of an ingredient", as received
//! - **[`AcquisitionOutcome`]**: the aggregated result sent back to the caller
//! - **[`DeliveryEnvelope`]**: transport metadata (reply destination, correlation token)
//! - **[`MessageBroker`]**: the queue seam (consume, send, ack, nack)
//! - **[`AvailabilitySource`]**: the external supply seam
//!
//! ## Message Flow
//!
//! ```text
//! market_requests ──► Delivery ──► AcquisitionRequest
//!                                        │
//!                                        ▼
//!                           AvailabilitySource (polled)
//!                                        │
//!                                        ▼
//! reply_to ◄── OutboundMessage ◄── AcquisitionOutcome
//! ```
//!
//! Implementations of the seams live in sibling crates: `market-redpanda`
//! (Kafka-compatible broker), `market-client` (HTTP source) and
//! `market-testing` (in-memory doubles).

pub mod availability;
pub mod broker;
pub mod envelope;
pub mod request;

pub use availability::{AvailabilityError, AvailabilitySource, Grant};
pub use broker::{Acknowledger, BrokerError, Delivery, DeliveryStream, MessageBroker};
pub use envelope::{CorrelationToken, DeliveryEnvelope, OutboundMessage};
pub use request::{
    AcquisitionOutcome, AcquisitionRequest, CodecError, Fulfillment, PartialReason,
};
