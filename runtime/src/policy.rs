//! Polling policy for the acquisition loop.
//!
//! The loop polls at a fixed interval: no exponential growth, no jitter.
//! By default it never gives up, which means an ingredient that is never
//! supplied holds its request forever. Setting `max_attempts` or
//! `max_duration` bounds the loop; when a bound is hit the request is answered
//! with a partial outcome instead.
//!
//! # Example
//!
//! ```rust
//! use market_runtime::policy::AcquisitionPolicy;
//! use std::time::Duration;
//!
//! let policy = AcquisitionPolicy::builder()
//!     .retry_interval(Duration::from_millis(500))
//!     .max_duration(Duration::from_secs(60))
//!     .build();
//!
//! assert!(policy.is_bounded());
//! ```

use std::time::Duration;

/// Default wait between polls that produced nothing.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5000);

/// Acquisition policy.
///
/// # Default Values
///
/// - `retry_interval`: 5000ms
/// - `max_attempts`: unbounded
/// - `max_duration`: unbounded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionPolicy {
    /// Wait after an empty grant or a failed call
    pub retry_interval: Duration,
    /// Maximum number of calls to the source
    pub max_attempts: Option<usize>,
    /// Maximum wall-clock time for one request
    pub max_duration: Option<Duration>,
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: None,
            max_duration: None,
        }
    }
}

impl AcquisitionPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> AcquisitionPolicyBuilder {
        AcquisitionPolicyBuilder {
            retry_interval: None,
            max_attempts: None,
            max_duration: None,
        }
    }

    /// `true` if either ceiling is set.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.max_attempts.is_some() || self.max_duration.is_some()
    }

    /// `true` once `attempts` calls have used up the attempt ceiling.
    #[must_use]
    pub fn attempts_exhausted(&self, attempts: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Builder for [`AcquisitionPolicy`].
#[derive(Debug, Clone)]
pub struct AcquisitionPolicyBuilder {
    retry_interval: Option<Duration>,
    max_attempts: Option<usize>,
    max_duration: Option<Duration>,
}

impl AcquisitionPolicyBuilder {
    /// Set the wait between unproductive polls.
    #[must_use]
    pub const fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Cap the number of calls to the source.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Cap the time spent on one request.
    #[must_use]
    pub const fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Build the [`AcquisitionPolicy`].
    #[must_use]
    pub fn build(self) -> AcquisitionPolicy {
        AcquisitionPolicy {
            retry_interval: self.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL),
            max_attempts: self.max_attempts,
            max_duration: self.max_duration,
        }
    }
}
