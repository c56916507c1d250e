//! # Market Runtime
//!
//! Runtime for the market procurement worker.
//!
//! ## Core Components
//!
//! - **[`acquire`]**: the polling loop that accumulates grants until a target is met
//! - **[`ReplyDispatcher`]**: sends outcomes to the requester's reply destination
//! - **[`RequestHandler`]**: parse → acquire → reply → settle, for one delivery
//! - **[`RequestIntake`]**: consumes the request queue into a bounded worker pool
//!
//! ## Example
//!
//! ```ignore
//! use market_runtime::{AcquisitionPolicy, ReplyDispatcher, RequestHandler, RequestIntake};
//!
//! let handler = RequestHandler::new(source, ReplyDispatcher::new(broker.clone()), AcquisitionPolicy::default());
//! let intake = RequestIntake::new("market_requests", broker, handler, shutdown_rx)
//!     .with_max_in_flight(16);
//!
//! let status = intake.status();
//! let handle = intake.spawn();
//! ```

/// The acquisition loop
pub mod acquisition;

/// Reply dispatch
pub mod dispatcher;

/// Errors raised while handling a delivery
pub mod error;

/// Per-delivery processing
pub mod handler;

/// Intake health reporting
pub mod health;

/// Request queue consumption
pub mod intake;

/// Prometheus metrics for observability
pub mod metrics;

/// Polling policy
pub mod policy;

pub use acquisition::acquire;
pub use dispatcher::ReplyDispatcher;
pub use error::HandlingError;
pub use handler::{RequestHandler, Settlement};
pub use health::{HealthCheck, HealthStatus, IntakeStatus};
pub use intake::{DEFAULT_MAX_IN_FLIGHT, RequestIntake};
pub use policy::AcquisitionPolicy;
