use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{Delivery, DeliveryOutcome};
use crate::clock::Clock;
use crate::config::{RelayRoute, RoutingPolicy, Secret};
use crate::error::{FailureClass, RelayError};
use crate::net::{EventDraft, RelayTransport, SignedEvent};
use crate::transform::ContentTransform;
use crate::types::{Category, Direction, QueueItem};

/// A signed event still short of its ack quorum.
#[derive(Debug, Clone)]
struct PendingPublish {
    signed: SignedEvent,
    acked: BTreeSet<String>,
}

/// Publishes Hive items to Nostr relays as notes or articles.
///
/// An item that misses its ack quorum keeps its signed event, so retries
/// resend the same event id only to relays that have not accepted it.
pub struct RelaySink {
    relay: Arc<dyn RelayTransport>,
    transform: ContentTransform,
    routing: RoutingPolicy,
    endpoints: Vec<String>,
    min_acks: usize,
    private_key: Secret,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    pending: HashMap<String, PendingPublish>,
}

impl RelaySink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relay: Arc<dyn RelayTransport>,
        transform: ContentTransform,
        routing: RoutingPolicy,
        endpoints: Vec<String>,
        min_acks: usize,
        private_key: Secret,
        clock: Arc<dyn Clock>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            relay,
            transform,
            routing,
            endpoints,
            min_acks,
            private_key,
            clock,
            call_timeout,
            pending: HashMap::new(),
        }
    }

    fn draft(&self, item: &QueueItem) -> Result<EventDraft, String> {
        let now = self.clock.now();
        match self.routing.relay_route(item.kind) {
            RelayRoute::Note => self.transform.note_draft(item, now).map_err(|e| e.to_string()),
            RelayRoute::Article => Ok(self.transform.article_draft(item, now)),
        }
    }

    async fn sign(&self, item: &QueueItem) -> Result<SignedEvent, DeliveryOutcome> {
        let draft = self.draft(item).map_err(|message| DeliveryOutcome::Failed {
            class: FailureClass::Permanent,
            message,
            retry_after: None,
        })?;
        match tokio::time::timeout(self.call_timeout, self.relay.sign(draft, &self.private_key)).await
        {
            Ok(Ok(signed)) => Ok(signed),
            Ok(Err(e)) => Err(failed(&e)),
            Err(_) => Err(failed(&RelayError::Timeout(self.call_timeout))),
        }
    }
}

fn failed(err: &RelayError) -> DeliveryOutcome {
    DeliveryOutcome::Failed {
        class: err.class(),
        message: err.to_string(),
        retry_after: None,
    }
}

#[async_trait]
impl Delivery for RelaySink {
    fn direction(&self) -> Direction {
        Direction::ToRelay
    }

    fn category(&self, _item: &QueueItem) -> Category {
        Category::Note
    }

    async fn deliver(&mut self, item: &QueueItem) -> DeliveryOutcome {
        let mut pending = match self.pending.remove(&item.source_id) {
            Some(pending) => pending,
            None => match self.sign(item).await {
                Ok(signed) => PendingPublish {
                    signed,
                    acked: BTreeSet::new(),
                },
                Err(outcome) => return outcome,
            },
        };

        let mut set = JoinSet::new();
        for endpoint in self.endpoints.iter().filter(|e| !pending.acked.contains(*e)).cloned() {
            let relay = Arc::clone(&self.relay);
            let event = pending.signed.clone();
            let timeout = self.call_timeout;
            set.spawn(async move {
                let result = match tokio::time::timeout(timeout, relay.publish(&endpoint, &event)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Timeout(timeout)),
                };
                (endpoint, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((endpoint, Ok(()))) => {
                    debug!(relay = %endpoint, event = %pending.signed.event.id, "Relay accepted event");
                    pending.acked.insert(endpoint);
                }
                Ok((endpoint, Err(e))) => {
                    warn!(relay = %endpoint, error = %e, "Relay publish failed");
                }
                Err(e) => warn!(error = %e, "Relay publish task failed"),
            }
        }

        let acked = pending.acked.len();
        if acked >= self.min_acks {
            return DeliveryOutcome::Posted {
                target: pending.signed.event.id,
            };
        }
        debug!(
            id = %item.source_id,
            event = %pending.signed.event.id,
            acked,
            "Holding signed event for retry"
        );
        self.pending.insert(item.source_id.clone(), pending);
        failed(&RelayError::InsufficientAcks {
            acked,
            required: self.min_acks,
        })
    }
}
