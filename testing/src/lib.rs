//! # Market Testing
//!
//! In-memory stand-ins for the market worker's external collaborators.
//!
//! - [`InMemoryBroker`]: a [`MessageBroker`](market_core::MessageBroker) that
//!   records every send and settlement, and redelivers requeued messages
//! - [`ScriptedSource`]: an [`AvailabilitySource`](market_core::AvailabilitySource)
//!   that replays per-ingredient scripts of grants and failures
//!
//! ## Example
//!
//! ```
//! use market_testing::{InMemoryBroker, ScriptedSource};
//!
//! let broker = InMemoryBroker::new();
//! let source = ScriptedSource::new().script("tomato", [Ok(3), Ok(0), Ok(4)]);
//! assert_eq!(source.total_calls(), 0);
//! assert!(broker.sent_to("replies").is_empty());
//! ```

pub mod broker;
pub mod source;

pub use broker::{InMemoryBroker, SettlementKind};
pub use source::ScriptedSource;
