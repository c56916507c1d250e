//! The acquisition loop.
//!
//! Polls an [`AvailabilitySource`] until the grants add up to the target:
//!
//! ```text
//! acquired = 0
//! while acquired < target:
//!     grant = source.acquire(ingredient)
//!     grant > 0   -> acquired += grant, poll again immediately
//!     grant == 0  -> wait retry_interval        (supply signal)
//!     error       -> wait retry_interval        (infrastructure signal)
//! ```
//!
//! The accumulator is local to one call, so concurrent requests never share
//! state. Every source call and every wait is a suspension point; under the
//! default policy the loop is unbounded.

use crate::metrics::AcquisitionMetrics;
use crate::policy::AcquisitionPolicy;
use market_core::{AcquisitionOutcome, AvailabilitySource, PartialReason};
use tokio::time::{Instant, sleep_until, timeout_at};

/// Acquire `target` units of `ingredient` from `source`.
///
/// Returns a complete outcome once the sum of grants reaches `target`. The sum
/// may overshoot the target when the last grant is larger than what was
/// missing. A zero target completes immediately without polling.
///
/// With a bounded `policy` the loop may instead return a partial outcome
/// carrying whatever had been granted when the bound was hit.
pub async fn acquire<S>(
    source: &S,
    ingredient: &str,
    target: u64,
    policy: &AcquisitionPolicy,
) -> AcquisitionOutcome
where
    S: AvailabilitySource + ?Sized,
{
    let started = Instant::now();
    let deadline = policy.max_duration.map(|limit| started + limit);
    let mut acquired: u64 = 0;
    let mut attempts: usize = 0;

    let outcome = loop {
        if acquired >= target {
            break AcquisitionOutcome::complete(ingredient, acquired);
        }
        if policy.attempts_exhausted(attempts) {
            break AcquisitionOutcome::partial(ingredient, acquired, PartialReason::AttemptsExhausted);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break AcquisitionOutcome::partial(ingredient, acquired, PartialReason::DeadlineElapsed);
        }

        attempts += 1;
        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, source.acquire(ingredient)).await {
                Ok(result) => result,
                Err(_) => {
                    break AcquisitionOutcome::partial(
                        ingredient,
                        acquired,
                        PartialReason::DeadlineElapsed,
                    );
                }
            },
            None => source.acquire(ingredient).await,
        };

        match result {
            Ok(granted) if granted > 0 => {
                acquired = acquired.saturating_add(granted);
                AcquisitionMetrics::record_grant(granted);
                tracing::debug!(ingredient, granted, acquired, target, attempt = attempts, "Granted");
                continue;
            }
            Ok(_) => {
                AcquisitionMetrics::record_empty_poll();
                tracing::debug!(
                    ingredient,
                    acquired,
                    target,
                    attempt = attempts,
                    retry_in_ms = policy.retry_interval.as_millis(),
                    "No supply available, waiting for restock"
                );
            }
            Err(error) => {
                AcquisitionMetrics::record_source_error();
                tracing::warn!(
                    ingredient,
                    acquired,
                    target,
                    attempt = attempts,
                    error = %error,
                    retry_in_ms = policy.retry_interval.as_millis(),
                    "Availability source call failed"
                );
            }
        }

        let wake = Instant::now() + policy.retry_interval;
        match deadline {
            Some(deadline) if deadline < wake => sleep_until(deadline).await,
            _ => sleep_until(wake).await,
        }
    };

    AcquisitionMetrics::record_finished(outcome.is_complete(), started.elapsed());
    if outcome.is_complete() {
        tracing::info!(ingredient, acquired = outcome.acquired_quantity, target, attempts, "Acquisition complete");
    } else {
        tracing::warn!(
            ingredient,
            acquired = outcome.acquired_quantity,
            target,
            attempts,
            fulfillment = ?outcome.fulfillment,
            "Acquisition stopped short of target"
        );
    }
    outcome
}
