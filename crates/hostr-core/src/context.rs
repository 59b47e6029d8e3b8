//! State shared by every bridge component.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::info;

use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::events::{BridgeEvent, BridgeStatus, EventSender, SharedStatus, EVENT_CHANNEL_CAPACITY};
use crate::ledger::{ProcessedLedger, SharedLedger, TO_PLATFORM_LEDGER_FILE, TO_RELAY_LEDGER_FILE};
use crate::net::{PlatformClient, RelayTransport};
use crate::transform::{ContentTransform, MarkerSet};
use crate::types::Direction;

/// Everything the listeners and workers share, owned by the supervisor.
pub struct BridgeContext {
    pub config: BridgeConfig,
    pub relay: Arc<dyn RelayTransport>,
    pub platform: Arc<dyn PlatformClient>,
    pub clock: Arc<dyn Clock>,
    pub markers: Arc<MarkerSet>,
    pub transform: ContentTransform,
    /// Nostr event ids already mirrored to Hive
    pub to_platform_ledger: SharedLedger,
    /// Hive permlinks already mirrored to Nostr
    pub to_relay_ledger: SharedLedger,
    pub status: SharedStatus,
    pub events: EventSender,
}

impl BridgeContext {
    /// Validate settings, load both ledgers from the state directory and
    /// prune expired entries.
    pub fn new(
        config: BridgeConfig,
        relay: Arc<dyn RelayTransport>,
        platform: Arc<dyn PlatformClient>,
        clock: Arc<dyn Clock>,
    ) -> BridgeResult<Self> {
        config.settings.validate()?;
        let now = clock.now();
        let retention = config.settings.retention();

        let mut to_platform =
            ProcessedLedger::load_from_disk(config.state_dir.join(TO_PLATFORM_LEDGER_FILE), now)?;
        let mut to_relay =
            ProcessedLedger::load_from_disk(config.state_dir.join(TO_RELAY_LEDGER_FILE), now)?;
        let pruned_platform = to_platform.prune_expired(now, retention)?;
        let pruned_relay = to_relay.prune_expired(now, retention)?;
        info!(
            nostr_events = to_platform.len(),
            hive_permlinks = to_relay.len(),
            pruned = pruned_platform + pruned_relay,
            "Ledgers ready"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let transform = ContentTransform::from_settings(&config.settings);

        Ok(Self {
            config,
            relay,
            platform,
            clock,
            markers: Arc::new(MarkerSet::standard()),
            transform,
            to_platform_ledger: Arc::new(Mutex::new(to_platform)),
            to_relay_ledger: Arc::new(Mutex::new(to_relay)),
            status: Arc::new(RwLock::new(BridgeStatus::default())),
            events,
        })
    }

    /// Ledger for items travelling in `direction`.
    pub fn ledger(&self, direction: Direction) -> &SharedLedger {
        match direction {
            Direction::ToPlatform => &self.to_platform_ledger,
            Direction::ToRelay => &self.to_relay_ledger,
        }
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Prune both ledgers. Returns entries removed per direction.
    pub fn prune_ledgers(&self) -> BridgeResult<(usize, usize)> {
        let now = self.clock.now();
        let retention = self.config.settings.retention();
        let platform = self.to_platform_ledger.lock().prune_expired(now, retention)?;
        let relay = self.to_relay_ledger.lock().prune_expired(now, retention)?;
        Ok((platform, relay))
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("config", &self.config)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}
