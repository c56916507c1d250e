//! Health reporting for the intake.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but saturated
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Requests currently being processed
    pub in_flight: usize,

    /// Maximum concurrent requests
    pub capacity: usize,
}

/// Live state of a running intake, shared with the web shell.
///
/// Cheap to clone; all clones observe the same counters.
#[derive(Debug, Clone)]
pub struct IntakeStatus {
    inner: Arc<StatusInner>,
}

#[derive(Debug)]
struct StatusInner {
    consuming: AtomicBool,
    in_flight: AtomicUsize,
    capacity: usize,
}

impl IntakeStatus {
    /// Status for an intake with `capacity` worker slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                consuming: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Whether the intake currently holds a live subscription.
    #[must_use]
    pub fn is_consuming(&self) -> bool {
        self.inner.consuming.load(Ordering::Acquire)
    }

    /// Requests currently being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Maximum concurrent requests.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub(crate) fn set_consuming(&self, consuming: bool) {
        self.inner.consuming.store(consuming, Ordering::Release);
    }

    pub(crate) fn enter(&self) -> InFlightGuard {
        let count = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        crate::metrics::IntakeMetrics::record_in_flight(count);
        InFlightGuard {
            status: self.clone(),
        }
    }

    /// Current health of the intake.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let in_flight = self.in_flight();
        let capacity = self.capacity();
        let (status, message) = if !self.is_consuming() {
            (HealthStatus::Unhealthy, Some("not consuming from the request queue".to_string()))
        } else if in_flight >= capacity {
            (HealthStatus::Degraded, Some("all worker slots busy".to_string()))
        } else {
            (HealthStatus::Healthy, None)
        };

        HealthCheck {
            component: "intake".to_string(),
            status,
            message,
            in_flight,
            capacity,
        }
    }
}

/// Decrements the in-flight count when dropped, including on task abort.
pub(crate) struct InFlightGuard {
    status: IntakeStatus,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let count = self.status.inner.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        crate::metrics::IntakeMetrics::record_in_flight(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhealthy_until_consuming() {
        let status = IntakeStatus::new(2);
        assert_eq!(status.health().status, HealthStatus::Unhealthy);

        status.set_consuming(true);
        assert_eq!(status.health().status, HealthStatus::Healthy);
    }

    #[test]
    fn degraded_when_saturated() {
        let status = IntakeStatus::new(2);
        status.set_consuming(true);

        let first = status.enter();
        let second = status.enter();
        assert_eq!(status.in_flight(), 2);
        assert_eq!(status.health().status, HealthStatus::Degraded);

        drop(first);
        drop(second);
        assert_eq!(status.in_flight(), 0);
        assert!(status.health().status.is_healthy());
    }
}
