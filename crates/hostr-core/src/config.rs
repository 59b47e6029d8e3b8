//! Bridge configuration.
//!
//! Credentials always come from the environment. Everything else is a
//! tunable with a default; a JSON settings file may override any subset.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::types::{ContentKind, KIND_ARTICLE, KIND_NOTE};

/// Bridge version stamped into every outbound footer.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Smallest short-note budget that keeps some content beside the truncation
/// notice and footer, however long the Hive link is.
pub const MIN_NOTE_BUDGET: usize = 200;

pub const ENV_HIVE_USERNAME: &str = "HIVE_USERNAME";
pub const ENV_HIVE_POSTING_KEY: &str = "HIVE_POSTING_KEY";
pub const ENV_NOSTR_PUBLIC_KEY: &str = "NOSTR_PUBLIC_KEY";
pub const ENV_NOSTR_PRIVATE_KEY: &str = "NOSTR_PRIVATE_KEY";

/// A credential that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for handing to a signer.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[redacted]")
    }
}

/// The one identity pair the bridge mirrors between.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub hive_username: String,
    pub hive_posting_key: Secret,
    pub nostr_public_key: String,
    pub nostr_private_key: Secret,
}

impl Credentials {
    /// Read all four required variables from the process environment.
    pub fn from_env() -> BridgeResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary lookup (env, tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BridgeResult<Self> {
        let get = |name: &'static str| -> BridgeResult<String> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(BridgeError::MissingCredential(name))
        };

        Ok(Self {
            hive_username: get(ENV_HIVE_USERNAME)?,
            hive_posting_key: Secret::new(get(ENV_HIVE_POSTING_KEY)?),
            nostr_public_key: get(ENV_NOSTR_PUBLIC_KEY)?,
            nostr_private_key: Secret::new(get(ENV_NOSTR_PRIVATE_KEY)?),
        })
    }
}

/// A named container family on Hive that snaps are nested under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Display name
    pub name: String,
    /// Tag the operator publishes containers under
    pub tag: String,
    /// Account that publishes the containers
    pub operator: String,
}

impl VenueConfig {
    pub fn new(name: &str, tag: &str, operator: &str) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
            operator: operator.to_string(),
        }
    }
}

/// Where a Nostr item lands on Hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRoute {
    /// Comment under the current venue container
    Venue,
    /// Top-level post under the long-form parent tag
    TopLevel,
}

/// What a Hive item becomes on Nostr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayRoute {
    /// Kind 1 note, truncated to the note budget
    Note,
    /// Kind 30023 article with title and summary tags
    Article,
}

/// Content kind to destination mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    pub short_to_platform: PlatformRoute,
    pub long_to_platform: PlatformRoute,
    pub short_to_relay: RelayRoute,
    pub long_to_relay: RelayRoute,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            short_to_platform: PlatformRoute::Venue,
            long_to_platform: PlatformRoute::TopLevel,
            short_to_relay: RelayRoute::Note,
            long_to_relay: RelayRoute::Note,
        }
    }
}

impl RoutingPolicy {
    /// Destination on Hive for a Nostr item of `kind`.
    pub fn platform_route(&self, kind: ContentKind) -> PlatformRoute {
        match kind {
            ContentKind::Short => self.short_to_platform,
            ContentKind::Long => self.long_to_platform,
        }
    }

    /// Shape on Nostr for a Hive item of `kind`.
    pub fn relay_route(&self, kind: ContentKind) -> RelayRoute {
        match kind {
            ContentKind::Short => self.short_to_relay,
            ContentKind::Long => self.long_to_relay,
        }
    }
}

/// Every tunable number and list the bridge uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Relay endpoints to subscribe and publish to
    pub relays: Vec<String>,
    /// Nostr kinds mirrored to Hive
    pub accepted_kinds: Vec<u16>,
    /// Subscription `since` lookback
    pub relay_lookback_secs: u64,
    /// Close and reopen the subscription this often
    pub relay_refresh_secs: u64,
    /// Delay before reconnecting when no relay is reachable
    pub relay_retry_secs: u64,
    /// Delay before resubscribing after a relay closed the subscription
    pub relay_quick_refresh_secs: u64,
    /// Relays that must accept a published note
    pub min_publish_acks: usize,
    /// Nostr events at least this old are dropped
    pub relay_recency_secs: u64,

    /// Hive feed poll interval
    pub poll_interval_secs: u64,
    /// Feed items fetched per poll
    pub poll_limit: usize,
    /// Hive posts at least this old are dropped
    pub platform_recency_secs: u64,

    /// Venue families, rotated round-robin
    pub venues: Vec<VenueConfig>,
    /// Parent permlink (tag) for top-level posts
    pub longform_parent: String,
    /// Characters above which a note counts as long-form
    pub longform_threshold: usize,
    /// Character budget for mirrored notes, footer included
    pub note_budget: usize,
    pub routing: RoutingPolicy,

    /// Minimum spacing between Hive writes
    pub min_post_spacing_secs: u64,
    /// Minimum spacing between relay publishes
    pub min_publish_spacing_secs: u64,
    pub snap_quota: u32,
    pub longform_quota: u32,
    /// Fixed UTC offset for the quota day; local time when unset
    pub quota_utc_offset_minutes: Option<i32>,

    /// Cooldown after a connection-level failure
    pub transient_cooldown_secs: u64,
    /// Retry delay when no venue container is available
    pub container_retry_secs: u64,
    /// Deadline for every collaborator call
    pub call_timeout_secs: u64,

    pub retention_days: i64,
    pub prune_interval_secs: u64,
    pub heartbeat_secs: u64,
    pub restart_delay_secs: u64,
    pub max_restarts: u32,
    /// A listener pair that survives this long resets the restart counter
    pub restart_reset_secs: u64,

    /// Keywords that opt an item out of mirroring
    pub do_not_bridge: Vec<String>,
    /// Bounded channel size between listeners and workers
    pub queue_capacity: usize,

    pub nostr_link_base: String,
    pub hive_link_base: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            relays: [
                "wss://relay.damus.io",
                "wss://nos.lol",
                "wss://relay.snort.social",
                "wss://nostr.wine",
                "wss://relay.nostr.band",
                "wss://nostr-pub.wellorder.net",
                "wss://offchain.pub",
                "wss://relay.primal.net",
                "wss://nostr.oxtr.dev",
                "wss://purplepag.es",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            accepted_kinds: vec![KIND_NOTE, KIND_ARTICLE],
            relay_lookback_secs: 300,
            relay_refresh_secs: 60,
            relay_retry_secs: 120,
            relay_quick_refresh_secs: 1,
            min_publish_acks: 3,
            relay_recency_secs: 300,

            poll_interval_secs: 120,
            poll_limit: 10,
            platform_recency_secs: 300,

            venues: vec![VenueConfig::new("snaps", "peak.snaps", "peak.snaps")],
            longform_parent: "hostr".to_string(),
            longform_threshold: 485,
            note_budget: 380,
            routing: RoutingPolicy::default(),

            min_post_spacing_secs: 300,
            min_publish_spacing_secs: 0,
            snap_quota: 10,
            longform_quota: 5,
            quota_utc_offset_minutes: None,

            transient_cooldown_secs: 120,
            container_retry_secs: 120,
            call_timeout_secs: 30,

            retention_days: 7,
            prune_interval_secs: 3600,
            heartbeat_secs: 60,
            restart_delay_secs: 5,
            max_restarts: 5,
            restart_reset_secs: 600,

            do_not_bridge: vec!["#nobridge".to_string(), "#nohostr".to_string()],
            queue_capacity: 1024,

            nostr_link_base: "https://njump.me".to_string(),
            hive_link_base: "https://peakd.com".to_string(),
        }
    }
}

impl BridgeSettings {
    /// Load a JSON settings file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| BridgeError::Persistence {
            path: path.display().to_string(),
            source,
        })?;
        let settings: BridgeSettings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations the bridge cannot run with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.relays.is_empty() {
            return Err(BridgeError::InvalidConfig("no relays configured".into()));
        }
        if self.venues.is_empty() {
            return Err(BridgeError::InvalidConfig("no venues configured".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll_interval_secs must be positive".into(),
            ));
        }
        if self.note_budget < MIN_NOTE_BUDGET {
            return Err(BridgeError::InvalidConfig(format!(
                "note_budget {} is below the minimum of {}",
                self.note_budget, MIN_NOTE_BUDGET
            )));
        }
        if self.min_publish_acks > self.relays.len() {
            return Err(BridgeError::InvalidConfig(format!(
                "min_publish_acks {} exceeds the {} configured relays",
                self.min_publish_acks,
                self.relays.len()
            )));
        }
        if self.queue_capacity == 0 {
            return Err(BridgeError::InvalidConfig(
                "queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn relay_lookback(&self) -> Duration {
        Duration::from_secs(self.relay_lookback_secs)
    }

    pub fn relay_refresh(&self) -> Duration {
        Duration::from_secs(self.relay_refresh_secs)
    }

    pub fn relay_retry(&self) -> Duration {
        Duration::from_secs(self.relay_retry_secs)
    }

    pub fn relay_quick_refresh(&self) -> Duration {
        Duration::from_secs(self.relay_quick_refresh_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn min_post_spacing(&self) -> Duration {
        Duration::from_secs(self.min_post_spacing_secs)
    }

    pub fn min_publish_spacing(&self) -> Duration {
        Duration::from_secs(self.min_publish_spacing_secs)
    }

    pub fn transient_cooldown(&self) -> Duration {
        Duration::from_secs(self.transient_cooldown_secs)
    }

    pub fn container_retry(&self) -> Duration {
        Duration::from_secs(self.container_retry_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn restart_reset(&self) -> Duration {
        Duration::from_secs(self.restart_reset_secs)
    }
}

/// Everything the supervisor needs to start.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub credentials: Credentials,
    pub settings: BridgeSettings,
    /// Directory holding the ledgers and rate state
    pub state_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(credentials: Credentials, settings: BridgeSettings, state_dir: PathBuf) -> Self {
        Self {
            credentials,
            settings,
            state_dir,
        }
    }
}
