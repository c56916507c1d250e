//! # Market Service
//!
//! Procurement worker for the kitchen: consumes purchase requests from
//! `market_requests`, buys the ingredient from the farmers market until the
//! requested quantity is reached, and replies to the requester.
//!
//! The crate wires the workspace together:
//!
//! - [`Config`]: environment configuration
//! - [`run`]: bootstrap, serve, and shut down
//! - [`start`]: the same on a caller-provided broker

pub mod app;
pub mod config;

pub use app::{run, start};
pub use config::{Config, ConfigError};
