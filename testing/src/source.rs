//! Scripted availability source.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use market_core::{AvailabilityError, AvailabilitySource, Grant};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct State {
    scripts: HashMap<String, VecDeque<Result<Grant, AvailabilityError>>>,
    stalled: HashSet<String>,
    fallback: Result<Grant, AvailabilityError>,
    latency: Duration,
    calls: HashMap<String, usize>,
    active: usize,
    peak_active: usize,
}

/// Availability source that replays a script per ingredient.
///
/// Once an ingredient's script is exhausted (or it never had one) every call
/// returns the fallback, `Ok(0)` unless changed. Stalled ingredients never
/// answer.
///
/// Cheap to clone; clones share scripts and call counts.
#[derive(Clone)]
pub struct ScriptedSource {
    state: Arc<Mutex<State>>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    /// Source with no scripts, answering `Ok(0)` to everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                scripts: HashMap::new(),
                stalled: HashSet::new(),
                fallback: Ok(0),
                latency: Duration::ZERO,
                calls: HashMap::new(),
                active: 0,
                peak_active: 0,
            })),
        }
    }

    /// Queue `responses` for `ingredient`, answered in order.
    #[must_use]
    pub fn script(
        self,
        ingredient: &str,
        responses: impl IntoIterator<Item = Result<Grant, AvailabilityError>>,
    ) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(ingredient.to_string())
            .or_default()
            .extend(responses);
        self
    }

    /// Never answer calls for `ingredient`.
    #[must_use]
    pub fn stall(self, ingredient: &str) -> Self {
        self.state.lock().unwrap().stalled.insert(ingredient.to_string());
        self
    }

    /// Answer unscripted calls with `fallback`.
    #[must_use]
    pub fn with_fallback(self, fallback: Result<Grant, AvailabilityError>) -> Self {
        self.state.lock().unwrap().fallback = fallback;
        self
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().latency = latency;
        self
    }

    /// Calls made for `ingredient`.
    #[must_use]
    pub fn call_count(&self, ingredient: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(ingredient)
            .copied()
            .unwrap_or(0)
    }

    /// Calls made for all ingredients.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    /// Highest number of calls that were awaiting an answer at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.state.lock().unwrap().peak_active
    }

    fn next_response(&self, ingredient: &str) -> Result<Grant, AvailabilityError> {
        let mut state = self.state.lock().unwrap();
        state.active -= 1;
        let scripted = state
            .scripts
            .get_mut(ingredient)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| state.fallback.clone())
    }
}

impl AvailabilitySource for ScriptedSource {
    fn acquire(
        &self,
        ingredient: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Grant, AvailabilityError>> + Send + '_>> {
        let (stalled, latency) = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(ingredient.to_string()).or_default() += 1;
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
            (state.stalled.contains(ingredient), state.latency)
        };
        let ingredient = ingredient.to_string();

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if stalled {
                std::future::pending::<()>().await;
            }
            self.next_response(&ingredient)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_then_falls_back() {
        let source = ScriptedSource::new()
            .script("tomato", [Ok(3), Err(AvailabilityError::RequestFailed("down".into()))])
            .with_fallback(Ok(1));

        assert_eq!(source.acquire("tomato").await, Ok(3));
        assert!(source.acquire("tomato").await.is_err());
        assert_eq!(source.acquire("tomato").await, Ok(1));
        assert_eq!(source.acquire("onion").await, Ok(1));

        assert_eq!(source.call_count("tomato"), 3);
        assert_eq!(source.total_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_peak_concurrency() {
        let source = ScriptedSource::new().with_latency(Duration::from_secs(1));

        let (a, b) = tokio::join!(source.acquire("a"), source.acquire("b"));
        assert_eq!((a, b), (Ok(0), Ok(0)));
        source.acquire("c").await.unwrap();

        assert_eq!(source.peak_concurrency(), 2);
    }
}
