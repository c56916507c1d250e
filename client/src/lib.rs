//! # Market Client
//!
//! HTTP client for the farmers market availability API, usable as the
//! worker's [`AvailabilitySource`](market_core::AvailabilitySource).
//!
//! ```text
//! GET <api_url>?ingredient=tomato   →   {"quantitySold": 3}
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use market_client::{DEFAULT_API_URL, MarketClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MarketClient::new(DEFAULT_API_URL)?;
//! let sold = client.buy("tomato").await?;
//! println!("bought {sold} tomatoes");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{DEFAULT_API_URL, DEFAULT_TIMEOUT, MarketClient};
pub use error::MarketClientError;
