//! Bridge supervisor
//!
//! Owns the [`BridgeContext`] and every task:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  BridgeSupervisor                                               │
//! │  ├── listener pair (restarted together on failure)              │
//! │  │   ├── RelayListener ──► mpsc ──► QueueWorker<PlatformSink>   │
//! │  │   └── PlatformPoller ─► mpsc ──► QueueWorker<RelaySink>      │
//! │  ├── heartbeat: queue depths, ledger sizes, daily counts        │
//! │  └── pruner: hourly ledger expiry                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers outlive listener restarts, so queued items survive them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{emit, BridgeEvent, BridgeStatus};
use crate::listener::{sleep_or_cancel, PlatformPoller, RelayListener};
use crate::net::{PlatformClient, RelayTransport};
use crate::rate::RateGate;
use crate::retry::RetryPolicy;
use crate::types::{Category, QueueItem};
use crate::venue::ContainerResolver;
use crate::worker::{PlatformSink, QueueWorker, RelaySink};

const MIN_TICK: Duration = Duration::from_secs(1);

/// Runs the bridge until cancelled.
pub struct BridgeSupervisor {
    ctx: Arc<BridgeContext>,
}

impl BridgeSupervisor {
    pub fn new(ctx: BridgeContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Load state and build a supervisor in one step.
    pub fn start(
        config: BridgeConfig,
        relay: Arc<dyn RelayTransport>,
        platform: Arc<dyn PlatformClient>,
        clock: Arc<dyn Clock>,
    ) -> BridgeResult<Self> {
        Ok(Self::new(BridgeContext::new(config, relay, platform, clock)?))
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.ctx.subscribe()
    }

    /// Current status snapshot.
    pub fn status(&self) -> BridgeStatus {
        self.ctx.status.read().clone()
    }

    fn platform_worker(
        &self,
        rx: mpsc::Receiver<QueueItem>,
    ) -> BridgeResult<QueueWorker<PlatformSink>> {
        let ctx = &self.ctx;
        let settings = &ctx.config.settings;
        let credentials = &ctx.config.credentials;
        let resolver = ContainerResolver::new(
            Arc::clone(&ctx.platform),
            settings.venues.clone(),
            settings.call_timeout(),
        );
        let sink = PlatformSink::new(
            Arc::clone(&ctx.platform),
            resolver,
            ctx.transform.clone(),
            settings.routing.clone(),
            credentials.hive_username.clone(),
            credentials.hive_posting_key.clone(),
            settings.longform_parent.clone(),
            settings.container_retry(),
            settings.call_timeout(),
        );
        Ok(QueueWorker::new(
            sink,
            rx,
            RateGate::for_platform(settings, &ctx.config.state_dir)?,
            RetryPolicy::for_platform(settings),
            Arc::clone(&ctx.to_platform_ledger),
            Arc::clone(&ctx.clock),
            Arc::clone(&ctx.status),
            ctx.events.clone(),
        ))
    }

    fn relay_worker(&self, rx: mpsc::Receiver<QueueItem>) -> QueueWorker<RelaySink> {
        let ctx = &self.ctx;
        let settings = &ctx.config.settings;
        let sink = RelaySink::new(
            Arc::clone(&ctx.relay),
            ctx.transform.clone(),
            settings.routing.clone(),
            settings.relays.clone(),
            settings.min_publish_acks,
            ctx.config.credentials.nostr_private_key.clone(),
            Arc::clone(&ctx.clock),
            settings.call_timeout(),
        );
        QueueWorker::new(
            sink,
            rx,
            RateGate::for_relay(settings),
            RetryPolicy::for_relay(settings),
            Arc::clone(&ctx.to_relay_ledger),
            Arc::clone(&ctx.clock),
            Arc::clone(&ctx.status),
            ctx.events.clone(),
        )
    }

    /// Run listeners, workers, heartbeat and pruner until `cancel` fires or
    /// the listener restart budget is exhausted.
    pub async fn run(&self, cancel: CancellationToken) -> BridgeResult<()> {
        let capacity = self.ctx.config.settings.queue_capacity;
        let (platform_tx, platform_rx) = mpsc::channel(capacity);
        let (relay_tx, relay_rx) = mpsc::channel(capacity);

        let platform_worker = self.platform_worker(platform_rx)?;
        let relay_worker = self.relay_worker(relay_rx);

        info!(
            hive_account = %self.ctx.config.credentials.hive_username,
            relays = self.ctx.config.settings.relays.len(),
            state_dir = %self.ctx.config.state_dir.display(),
            "Starting bridge"
        );

        let workers_cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        workers.spawn(platform_worker.run(workers_cancel.clone()));
        workers.spawn(relay_worker.run(workers_cancel.clone()));

        let chores_cancel = CancellationToken::new();
        let mut chores = JoinSet::new();
        chores.spawn(heartbeat(Arc::clone(&self.ctx), chores_cancel.clone()));
        chores.spawn(pruner(Arc::clone(&self.ctx), chores_cancel.clone()));

        let result = self
            .supervise_listeners(&cancel, &platform_tx, &relay_tx, &mut workers)
            .await;

        chores_cancel.cancel();
        workers_cancel.cancel();
        drop(platform_tx);
        drop(relay_tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Queue worker ended abnormally");
            }
        }
        chores.shutdown().await;

        let status = self.status();
        info!(
            nostr_to_hive_pending = status.to_platform.depth,
            hive_to_nostr_pending = status.to_relay.depth,
            "Bridge stopped"
        );
        result
    }

    /// Run until Ctrl+C.
    pub async fn run_until_ctrl_c(&self) -> BridgeResult<()> {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                trigger.cancel();
            }
        });
        self.run(cancel).await
    }

    async fn supervise_listeners(
        &self,
        cancel: &CancellationToken,
        platform_tx: &mpsc::Sender<QueueItem>,
        relay_tx: &mpsc::Sender<QueueItem>,
        workers: &mut JoinSet<BridgeResult<()>>,
    ) -> BridgeResult<()> {
        let settings = &self.ctx.config.settings;
        let mut restarts: u32 = 0;

        loop {
            let pair_cancel = cancel.child_token();
            let mut pair = JoinSet::new();
            pair.spawn(
                RelayListener::new(Arc::clone(&self.ctx), platform_tx.clone())
                    .run(pair_cancel.clone()),
            );
            pair.spawn(
                PlatformPoller::new(Arc::clone(&self.ctx), relay_tx.clone())
                    .run(pair_cancel.clone()),
            );
            let started = Instant::now();

            let failure = tokio::select! {
                _ = cancel.cancelled() => None,
                joined = pair.join_next() => match joined {
                    Some(Ok(Ok(()))) => Some("listener exited".to_string()),
                    Some(Ok(Err(e))) => Some(e.to_string()),
                    Some(Err(e)) => Some(e.to_string()),
                    None => Some("no listeners running".to_string()),
                },
                joined = workers.join_next(), if !workers.is_empty() => {
                    pair_cancel.cancel();
                    pair.shutdown().await;
                    let reason = match joined {
                        Some(Err(e)) => e.to_string(),
                        _ => "worker exited".to_string(),
                    };
                    error!(error = %reason, "Queue worker stopped unexpectedly");
                    return Err(BridgeError::QueueClosed(reason));
                }
            };

            pair_cancel.cancel();
            pair.shutdown().await;

            let Some(failure) = failure else {
                return Ok(());
            };
            if cancel.is_cancelled() {
                return Ok(());
            }

            if started.elapsed() >= settings.restart_reset() {
                restarts = 0;
            }
            if restarts >= settings.max_restarts {
                error!(restarts, error = %failure, "Listener restart limit reached");
                return Err(BridgeError::RestartLimit(restarts));
            }
            restarts += 1;
            error!(
                attempt = restarts,
                max = settings.max_restarts,
                delay_secs = settings.restart_delay_secs,
                error = %failure,
                "Listener failed, restarting"
            );
            self.ctx.status.write().restarts += 1;
            emit(
                &self.ctx.events,
                BridgeEvent::ListenerRestarted { attempt: restarts },
            );

            if sleep_or_cancel(settings.restart_delay(), cancel).await {
                return Ok(());
            }
        }
    }
}

/// Periodic status line.
async fn heartbeat(ctx: Arc<BridgeContext>, cancel: CancellationToken) {
    let period = ctx.config.settings.heartbeat().max(MIN_TICK);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let status = ctx.status.read().clone();
                let nostr_ledger = ctx.to_platform_ledger.lock().len();
                let hive_ledger = ctx.to_relay_ledger.lock().len();
                let daily = |c: Category| status.to_platform.daily.get(&c).copied().unwrap_or(0);
                info!(
                    nostr_to_hive_queue = status.to_platform.depth,
                    hive_to_nostr_queue = status.to_relay.depth,
                    nostr_ledger,
                    hive_ledger,
                    snaps_today = daily(Category::Snap),
                    longform_today = daily(Category::Longform),
                    relay_listener = %status.relay_listener,
                    hive_poller = %status.platform_listener,
                    "Heartbeat"
                );
            }
        }
    }
}

/// Periodic ledger expiry.
async fn pruner(ctx: Arc<BridgeContext>, cancel: CancellationToken) {
    let period = ctx.config.settings.prune_interval().max(MIN_TICK);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match ctx.prune_ledgers() {
                Ok((nostr, hive)) if nostr + hive > 0 => {
                    info!(nostr_events = nostr, hive_permlinks = hive, "Pruned ledgers");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Ledger prune failed"),
            },
        }
    }
}
