//! Queue workers.
//!
//! One [`QueueWorker`] per direction owns that direction's
//! [`DirectionalQueue`] and [`RateGate`], receives items from the listeners
//! over a bounded channel and drains strictly one write at a time:
//!
//! ```text
//! pop head ─► ledger hit? ──yes──► drop
//!                │no
//!                ▼
//!          gate allows? ──no──► back to head, wait
//!                │yes
//!                ▼
//!             deliver ──ok──► ledger + gate
//!                │err
//!                ├─ transient / rate limited ─► back to head, cooldown
//!                └─ permanent ─► ledger, next
//! ```

mod platform_sink;
mod relay_sink;

pub use platform_sink::PlatformSink;
pub use relay_sink::RelaySink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{BridgeResult, FailureClass};
use crate::events::{emit, BridgeEvent, EventSender, SharedStatus, SkipReason};
use crate::ledger::SharedLedger;
use crate::queue::DirectionalQueue;
use crate::rate::{GateDecision, RateGate};
use crate::retry::RetryPolicy;
use crate::types::{Category, Direction, QueueItem};

/// Result of one write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written; `target` is the new permlink or event id
    Posted { target: String },
    /// Not attempted because a prerequisite is missing (no venue container)
    Deferred { wait: Duration, reason: String },
    /// Attempted and failed
    Failed {
        class: FailureClass,
        message: String,
        /// Cooldown reported by the backend
        retry_after: Option<Duration>,
    },
}

/// Writes items to one destination network.
#[async_trait]
pub trait Delivery: Send {
    /// Direction this sink serves.
    fn direction(&self) -> Direction;

    /// Rate gate category an item will be written under.
    fn category(&self, item: &QueueItem) -> Category;

    /// Compose and write `item`.
    async fn deliver(&mut self, item: &QueueItem) -> DeliveryOutcome;
}

/// Single-owner drain loop for one direction.
pub struct QueueWorker<D: Delivery> {
    direction: Direction,
    delivery: D,
    rx: mpsc::Receiver<QueueItem>,
    rx_open: bool,
    queue: DirectionalQueue,
    gate: RateGate,
    retry: RetryPolicy,
    ledger: SharedLedger,
    clock: Arc<dyn Clock>,
    status: SharedStatus,
    events: EventSender,
}

impl<D: Delivery> QueueWorker<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        delivery: D,
        rx: mpsc::Receiver<QueueItem>,
        gate: RateGate,
        retry: RetryPolicy,
        ledger: SharedLedger,
        clock: Arc<dyn Clock>,
        status: SharedStatus,
        events: EventSender,
    ) -> Self {
        Self {
            direction: delivery.direction(),
            delivery,
            rx,
            rx_open: true,
            queue: DirectionalQueue::new(),
            gate,
            retry,
            ledger,
            clock,
            status,
            events,
        }
    }

    /// Drain until cancelled, or until the channel closes and the queue
    /// empties.
    pub async fn run(mut self, cancel: CancellationToken) -> BridgeResult<()> {
        info!(direction = self.direction.label(), "Queue worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            while let Ok(item) = self.rx.try_recv() {
                self.accept(item);
            }

            if self.queue.is_empty() {
                if !self.rx_open {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = self.rx.recv() => match received {
                        Some(item) => self.accept(item),
                        None => self.rx_open = false,
                    },
                }
                continue;
            }

            if let Some(at) = self.queue.not_before() {
                if Instant::now() < at {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep_until(at) => self.queue.clear_deferral(),
                        received = self.rx.recv(), if self.rx_open => match received {
                            Some(item) => self.accept(item),
                            None => self.rx_open = false,
                        },
                    }
                    continue;
                }
                self.queue.clear_deferral();
            }

            self.drain_one().await;
        }

        info!(
            direction = self.direction.label(),
            pending = self.queue.len(),
            "Queue worker stopped"
        );
        Ok(())
    }

    /// Take an item from a listener.
    fn accept(&mut self, item: QueueItem) {
        let id = item.source_id.clone();
        let reason = if self.ledger.lock().has(&id) {
            Some(SkipReason::AlreadyProcessed)
        } else if !self.queue.push_back(item) {
            Some(SkipReason::AlreadyQueued)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(direction = self.direction.label(), id = %id, %reason, "Dropping duplicate");
                self.settle(|_| {});
                emit(
                    &self.events,
                    BridgeEvent::Skipped {
                        direction: self.direction,
                        id,
                        reason,
                    },
                );
            }
            None => self.sync_depth(),
        }
    }

    /// Process the head of the queue.
    async fn drain_one(&mut self) {
        let Some(mut item) = self.queue.pop_front() else {
            return;
        };
        let direction = self.direction;
        let id = item.source_id.clone();

        if self.ledger.lock().has(&id) {
            debug!(direction = direction.label(), id = %id, "Already processed, dropping");
            self.sync_depth();
            self.settle(|_| {});
            emit(
                &self.events,
                BridgeEvent::Skipped {
                    direction,
                    id,
                    reason: SkipReason::AlreadyProcessed,
                },
            );
            return;
        }

        let category = self.delivery.category(&item);
        if let GateDecision::Blocked { wait, reason } =
            self.gate.can_post_now(category, self.clock.now())
        {
            info!(
                direction = direction.label(),
                id = %id,
                %category,
                ?reason,
                wait_secs = wait.as_secs(),
                "Rate gate closed, waiting"
            );
            self.requeue(item, wait);
            emit(&self.events, BridgeEvent::Deferred { direction, id, wait });
            return;
        }

        info!(
            direction = direction.label(),
            id = %id,
            %category,
            preview = %item.preview(),
            "Posting"
        );
        match self.delivery.deliver(&item).await {
            DeliveryOutcome::Posted { target } => {
                let now = self.clock.now();
                self.mark_processed(&id);
                if let Err(e) = self.gate.record_post(category, now) {
                    error!(direction = direction.label(), error = %e, "Failed to persist rate state");
                }
                let daily = self.gate.state().daily_counts.clone();
                self.sync_depth();
                self.settle(move |stats| {
                    stats.posted += 1;
                    stats.daily = daily;
                });
                info!(direction = direction.label(), id = %id, target = %target, "Cross-posted");
                emit(&self.events, BridgeEvent::Posted { direction, id, target });
            }
            DeliveryOutcome::Deferred { wait, reason } => {
                warn!(
                    direction = direction.label(),
                    id = %id,
                    %reason,
                    wait_secs = wait.as_secs(),
                    "Delivery deferred"
                );
                self.requeue(item, wait);
                emit(&self.events, BridgeEvent::Deferred { direction, id, wait });
            }
            DeliveryOutcome::Failed {
                class,
                message,
                retry_after,
            } => {
                item.attempts += 1;
                let delay = match (class, retry_after) {
                    (FailureClass::RateLimited, Some(hint)) => Some(hint),
                    _ => self.retry.delay_for(class, item.attempts),
                };
                match delay {
                    Some(delay) => {
                        warn!(
                            direction = direction.label(),
                            id = %id,
                            ?class,
                            attempt = item.attempts,
                            retry_in_secs = delay.as_secs(),
                            error = %message,
                            "Write failed, will retry"
                        );
                        self.requeue(item, delay);
                        self.status.write().queue_mut(direction).retries += 1;
                        emit(
                            &self.events,
                            BridgeEvent::Retrying {
                                direction,
                                id,
                                class,
                                delay,
                            },
                        );
                    }
                    None => {
                        error!(
                            direction = direction.label(),
                            id = %id,
                            preview = %item.preview(),
                            error = %message,
                            "Write failed permanently, marking processed"
                        );
                        self.mark_processed(&id);
                        self.sync_depth();
                        self.settle(|stats| stats.rejected += 1);
                        emit(&self.events, BridgeEvent::Rejected { direction, id, message });
                    }
                }
            }
        }
    }

    fn requeue(&mut self, item: QueueItem, wait: Duration) {
        self.queue.push_front(item);
        self.queue.defer_until(Instant::now() + wait);
        self.sync_depth();
    }

    fn mark_processed(&self, id: &str) {
        let now = self.clock.now();
        if let Err(e) = self.ledger.lock().mark_processed(id, now) {
            error!(
                direction = self.direction.label(),
                id = %id,
                error = %e,
                "Failed to persist ledger, keeping in-memory mark"
            );
        }
    }

    fn sync_depth(&self) {
        self.status.write().queue_mut(self.direction).depth = self.queue.len();
    }

    fn settle(&self, update: impl FnOnce(&mut crate::events::QueueStats)) {
        let mut status = self.status.write();
        let stats = status.queue_mut(self.direction);
        stats.settled += 1;
        update(stats);
    }
}
