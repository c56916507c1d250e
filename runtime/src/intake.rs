//! Request intake: the consume loop feeding a bounded worker pool.
//!
//! # Pattern: Subscribe-Dispatch-Reconnect Loop
//!
//! ```text
//! loop {
//!     consume(queue):
//!         loop {
//!             wait for a free worker slot
//!             take next delivery
//!             spawn handler (holds the slot until settled)
//!         }
//!     if stream ended or subscription failed:
//!         wait reconnect_delay
//! }
//! on shutdown: stop taking deliveries, drain in-flight handlers
//! ```
//!
//! A slot is acquired *before* the next delivery is pulled, so a saturated
//! worker stops reading from the broker instead of buffering requests it
//! cannot start.
//!
//! # Shutdown
//!
//! A message on the broadcast channel stops the loop. In-flight handlers get
//! `shutdown_grace` to finish; whatever is still running afterwards is
//! aborted and its delivery is left unsettled for the broker to redeliver.

use crate::handler::RequestHandler;
use crate::health::IntakeStatus;
use futures::StreamExt;
use market_core::{DeliveryStream, MessageBroker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// Default number of requests processed concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, PartialEq, Eq)]
enum StreamExit {
    Ended,
    Shutdown,
}

/// Consumes the request queue and runs one handler per delivery.
pub struct RequestIntake {
    queue: String,
    broker: Arc<dyn MessageBroker>,
    handler: RequestHandler,
    shutdown: broadcast::Receiver<()>,
    status: IntakeStatus,
    slots: Arc<Semaphore>,
    reconnect_delay: Duration,
    shutdown_grace: Duration,
}

impl RequestIntake {
    /// Create an intake for `queue`.
    ///
    /// Defaults: 16 worker slots, 5 s reconnect delay, 30 s shutdown grace.
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        handler: RequestHandler,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            handler,
            shutdown,
            status: IntakeStatus::new(DEFAULT_MAX_IN_FLIGHT),
            slots: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            reconnect_delay: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }

    /// Set the number of worker slots (at least one).
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        self.status = IntakeStatus::new(max_in_flight);
        self.slots = Arc::new(Semaphore::new(max_in_flight));
        self
    }

    /// Set the delay before re-subscribing after the stream ends.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set how long in-flight handlers may run after shutdown.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Handle for observing the running intake.
    #[must_use]
    pub fn status(&self) -> IntakeStatus {
        self.status.clone()
    }

    /// Spawn the intake as a background task.
    ///
    /// The returned handle resolves after shutdown, once in-flight handlers
    /// have finished or been aborted.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the intake until a shutdown signal is received.
    pub async fn run(mut self) {
        info!(
            queue = %self.queue,
            max_in_flight = self.status.capacity(),
            "Request intake started"
        );
        let mut tasks = JoinSet::new();

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.broker.consume(&self.queue) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(queue = %self.queue, "Consuming request queue");
                    self.status.set_consuming(true);
                    let exit = self.process_stream(&mut stream, &mut tasks).await;
                    self.status.set_consuming(false);
                    if exit == StreamExit::Shutdown {
                        break;
                    }
                    warn!(
                        queue = %self.queue,
                        "Delivery stream ended, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(e) => {
                    error!(
                        queue = %self.queue,
                        error = %e,
                        "Failed to consume request queue, retrying in {:?}",
                        self.reconnect_delay
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!(queue = %self.queue, "Request intake received shutdown signal");
        self.drain(tasks).await;
    }

    async fn process_stream(
        &mut self,
        stream: &mut DeliveryStream,
        tasks: &mut JoinSet<()>,
    ) -> StreamExit {
        loop {
            while let Some(finished) = tasks.try_join_next() {
                log_join(finished);
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.recv() => return StreamExit::Shutdown,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return StreamExit::Shutdown,
                },
            };

            let next = tokio::select! {
                biased;
                _ = self.shutdown.recv() => return StreamExit::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let handler = self.handler.clone();
                    let guard = self.status.enter();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let _guard = guard;
                        handler.handle(delivery).await;
                    });
                }
                Some(Err(e)) => {
                    error!(queue = %self.queue, error = %e, "Error receiving delivery");
                }
                None => return StreamExit::Ended,
            }
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if !tasks.is_empty() {
            info!(
                in_flight = tasks.len(),
                "Waiting up to {:?} for in-flight requests",
                self.shutdown_grace
            );
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while let Some(finished) = tasks.join_next().await {
                    log_join(finished);
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    remaining = tasks.len(),
                    "Shutdown grace elapsed, aborting in-flight requests (they will be redelivered)"
                );
                tasks.shutdown().await;
            }
        }

        info!(queue = %self.queue, "Request intake stopped");
    }
}

fn log_join(result: Result<(), JoinError>) {
    match result {
        Err(e) if e.is_panic() => error!(error = %e, "Request handler task panicked"),
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_handler_tasks_are_logged_not_propagated() {
        let mut tasks: JoinSet<()> = JoinSet::new();
        tasks.spawn(async { panic!("handler blew up") });
        tasks.spawn(async {});

        while let Some(finished) = tasks.join_next().await {
            log_join(finished);
        }

        assert!(tasks.is_empty());
    }
}
