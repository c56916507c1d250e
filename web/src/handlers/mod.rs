//! HTTP request handlers.

pub mod health;
pub mod metrics;

pub use health::{health_check, readiness, root};
pub use metrics::metrics;
