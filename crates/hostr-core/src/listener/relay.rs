use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{hand_off, report_skip, set_status, sleep_or_cancel};
use crate::context::BridgeContext;
use crate::error::{BridgeResult, RelayError};
use crate::events::{ListenerStatus, SkipReason};
use crate::net::{RelayEvent, RelayFilter, SubscriptionMessage};
use crate::transform::{opt_out_keyword, MarkerSubject};
use crate::types::{format_age, preview, Direction, QueueItem, KIND_NOTE};

const DIRECTION: Direction = Direction::ToPlatform;

/// Relay notice that means the subscription has to be reopened.
const INACTIVE_SUBSCRIPTION: &str = "no active subscription";

/// What ended one subscription session.
enum SessionEnd {
    Cancelled,
    /// Reopen after this long
    Reopen(std::time::Duration),
}

/// Live subscription to the bridged Nostr account.
pub struct RelayListener {
    ctx: Arc<BridgeContext>,
    tx: mpsc::Sender<QueueItem>,
}

impl RelayListener {
    pub fn new(ctx: Arc<BridgeContext>, tx: mpsc::Sender<QueueItem>) -> Self {
        Self { ctx, tx }
    }

    /// Filter for a session starting now.
    pub fn filter(&self) -> RelayFilter {
        let settings = &self.ctx.config.settings;
        let lookback = chrono::Duration::from_std(settings.relay_lookback())
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        RelayFilter {
            kinds: settings.accepted_kinds.clone(),
            authors: vec![self.ctx.config.credentials.nostr_public_key.clone()],
            since: self.ctx.clock.now() - lookback,
        }
    }

    /// Decide whether `event` should be mirrored.
    pub fn evaluate(&self, event: &RelayEvent) -> Result<QueueItem, SkipReason> {
        let settings = &self.ctx.config.settings;
        let now = self.ctx.clock.now();

        let age = now - event.created_at;
        if age.num_seconds() >= settings.relay_recency_secs as i64 {
            return Err(SkipReason::TooOld {
                age_secs: age.num_seconds(),
            });
        }

        let subject = MarkerSubject::text(&event.content).with_tags(&event.tags);
        if let Some(marker) = self.ctx.markers.detect(&subject) {
            return Err(SkipReason::LoopMarker(marker));
        }
        if let Some(keyword) = opt_out_keyword(&event.content, &settings.do_not_bridge) {
            return Err(SkipReason::OptOut(keyword.to_string()));
        }
        if event.kind == KIND_NOTE && (event.has_tag("e") || event.has_tag("p")) {
            return Err(SkipReason::Reply);
        }
        if !settings.accepted_kinds.contains(&event.kind) {
            return Err(SkipReason::UnsupportedKind(event.kind));
        }
        if self.ctx.to_platform_ledger.lock().has(&event.id) {
            return Err(SkipReason::AlreadyProcessed);
        }

        debug!(id = %event.id, age = %format_age(age), "Event eligible");
        Ok(QueueItem {
            source_id: event.id.clone(),
            content: event.content.clone(),
            kind: self.ctx.transform.classify_event(event.kind, &event.content),
            tags: event.tags.clone(),
            title: None,
            author: event.pubkey.clone(),
            created_at: event.created_at,
            enqueued_at: now,
            attempts: 0,
        })
    }

    async fn handle(&self, event: RelayEvent) -> BridgeResult<()> {
        info!(
            direction = DIRECTION.label(),
            id = %event.id,
            kind = event.kind,
            preview = %preview(&event.content),
            "Received event"
        );
        match self.evaluate(&event) {
            Ok(item) => hand_off(&self.ctx, &self.tx, DIRECTION, item).await,
            Err(reason) => {
                report_skip(&self.ctx, DIRECTION, &event.id, reason);
                Ok(())
            }
        }
    }

    /// Connect to every configured relay concurrently; returns the ones
    /// that answered.
    async fn connect_all(&self) -> Vec<String> {
        let timeout = self.ctx.config.settings.call_timeout();
        let mut set = JoinSet::new();
        for endpoint in self.ctx.config.settings.relays.iter().cloned() {
            let relay = Arc::clone(&self.ctx.relay);
            set.spawn(async move {
                let result = match tokio::time::timeout(timeout, relay.connect(&endpoint)).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Timeout(timeout)),
                };
                (endpoint, result)
            });
        }

        let mut connected = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((endpoint, Ok(()))) => connected.push(endpoint),
                Ok((endpoint, Err(e))) => {
                    warn!(relay = %endpoint, error = %e, "Relay connection failed");
                }
                Err(e) => warn!(error = %e, "Relay connect task failed"),
            }
        }
        // Keep configuration order for stable logs
        let order = &self.ctx.config.settings.relays;
        connected.sort_by_key(|e| order.iter().position(|r| r == e));
        connected
    }

    /// Run until cancelled. Returns an error only if the queue is gone.
    pub async fn run(self, cancel: CancellationToken) -> BridgeResult<()> {
        let settings = self.ctx.config.settings.clone();
        info!(
            relays = settings.relays.len(),
            author = %self.ctx.config.credentials.nostr_public_key,
            "Starting relay listener"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            set_status(&self.ctx, DIRECTION, ListenerStatus::Connecting);

            let connected = self.connect_all().await;
            if connected.is_empty() {
                warn!(
                    retry_in_secs = settings.relay_retry_secs,
                    "No relays reachable, retrying later"
                );
                set_status(
                    &self.ctx,
                    DIRECTION,
                    ListenerStatus::Backoff {
                        retry_in_secs: settings.relay_retry_secs,
                    },
                );
                if sleep_or_cancel(settings.relay_retry(), &cancel).await {
                    return Ok(());
                }
                continue;
            }

            match self.session(&connected, &cancel).await? {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::Reopen(delay) => {
                    if !delay.is_zero() {
                        set_status(
                            &self.ctx,
                            DIRECTION,
                            ListenerStatus::Backoff {
                                retry_in_secs: delay.as_secs(),
                            },
                        );
                    }
                    if sleep_or_cancel(delay, &cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One subscription, held until refresh, error or cancellation.
    async fn session(
        &self,
        connected: &[String],
        cancel: &CancellationToken,
    ) -> BridgeResult<SessionEnd> {
        let settings = &self.ctx.config.settings;
        let filter = self.filter();
        let opened = tokio::time::timeout(
            settings.call_timeout(),
            self.ctx.relay.subscribe(connected, &filter),
        )
        .await;
        let mut subscription = match opened {
            Ok(Ok(sub)) => sub,
            Ok(Err(e)) => {
                warn!(error = %e, "Subscription failed, retrying later");
                return Ok(SessionEnd::Reopen(settings.relay_retry()));
            }
            Err(_) => {
                warn!("Subscription timed out, retrying later");
                return Ok(SessionEnd::Reopen(settings.relay_retry()));
            }
        };

        info!(
            relays = connected.len(),
            since = filter.since.timestamp(),
            "Subscribed"
        );
        self.ctx.status.write().subscriptions += 1;
        set_status(
            &self.ctx,
            DIRECTION,
            ListenerStatus::Listening {
                relays: connected.len(),
            },
        );

        let refresh = tokio::time::sleep(settings.relay_refresh());
        tokio::pin!(refresh);

        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = &mut refresh => {
                    debug!("Refreshing subscription");
                    break SessionEnd::Reopen(std::time::Duration::ZERO);
                }
                message = subscription.recv() => match message {
                    Some(SubscriptionMessage::Event(event)) => self.handle(event).await?,
                    Some(SubscriptionMessage::EndOfStored) => {
                        debug!("End of stored events");
                    }
                    Some(SubscriptionMessage::Error(message)) => {
                        if message.to_lowercase().contains(INACTIVE_SUBSCRIPTION) {
                            info!(%message, "Subscription inactive, refreshing");
                            break SessionEnd::Reopen(settings.relay_quick_refresh());
                        }
                        warn!(%message, "Subscription error, retrying later");
                        break SessionEnd::Reopen(settings.relay_retry());
                    }
                    Some(SubscriptionMessage::Closed) | None => {
                        warn!("Subscription closed by relays");
                        break SessionEnd::Reopen(settings.relay_quick_refresh());
                    }
                },
            }
        };

        subscription.close();
        Ok(end)
    }
}
