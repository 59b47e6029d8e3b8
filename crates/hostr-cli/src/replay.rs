//! Replay harness: run the whole bridge against in-memory networks seeded
//! from a JSON fixture.
//!
//! ```text
//! fixture.json ──► MemoryRelay (stored events)  ──┐
//!              └─► MemoryPlatform (feed, venues) ─┤
//!                                                 ▼
//!                                        BridgeSupervisor::run
//!                                                 │
//!              settled, timed out or Ctrl+C ◄─────┘
//!                                                 │
//!                                                 ▼
//!                                  ReplayReport (writes + status)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hostr_core::{
    BridgeConfig, BridgeEvent, BridgeSettings, BridgeStatus, BridgeSupervisor, Clock, CommentOp,
    Credentials, MemoryPlatform, MemoryRelay, PlatformPost, RelayEvent, Secret, SignedEvent,
    SystemClock, KIND_NOTE,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_HIVE_USER: &str = "hostr-replay";
const DEFAULT_NOSTR_PUBKEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

/// How often the harness checks whether the bridge has settled.
const SETTLE_TICK: Duration = Duration::from_millis(250);

/// Consecutive settled ticks required before stopping.
const SETTLE_TICKS: u32 = 4;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub account: Option<FixtureAccount>,
    /// Partial settings layered over the replay defaults
    pub settings: Option<serde_json::Value>,
    pub relay_events: Vec<FixtureEvent>,
    pub platform_posts: Vec<FixturePost>,
    pub containers: Vec<FixtureContainer>,
    pub unreachable_relays: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureAccount {
    pub hive_username: String,
    pub nostr_public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct FixtureEvent {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: u16,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub age_secs: i64,
}

fn default_kind() -> u16 {
    KIND_NOTE
}

#[derive(Debug, Deserialize)]
pub struct FixturePost {
    pub permlink: String,
    #[serde(default)]
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent_author: String,
    #[serde(default)]
    pub age_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct FixtureContainer {
    pub permlink: String,
    /// Venue tag; the first configured venue when absent
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub age_secs: i64,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid fixture {}", path.display()))
    }

    /// Replay settings: `base` without write spacing, then the fixture's
    /// overrides.
    pub fn settings(&self, base: BridgeSettings) -> Result<BridgeSettings> {
        let base = BridgeSettings {
            min_post_spacing_secs: 0,
            ..base
        };
        let Some(overrides) = &self.settings else {
            return Ok(base);
        };
        let Some(overrides) = overrides.as_object() else {
            bail!("Fixture settings must be a JSON object");
        };

        let mut merged = serde_json::to_value(&base)?;
        if let Some(fields) = merged.as_object_mut() {
            for (key, value) in overrides {
                fields.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(merged).context("Invalid fixture settings")
    }

    fn credentials(&self) -> Credentials {
        let (hive, nostr) = match &self.account {
            Some(account) => (
                account.hive_username.clone(),
                account.nostr_public_key.clone(),
            ),
            None => (
                DEFAULT_HIVE_USER.to_string(),
                DEFAULT_NOSTR_PUBKEY.to_string(),
            ),
        };
        Credentials {
            hive_username: hive,
            hive_posting_key: Secret::new("replay-posting-key"),
            nostr_public_key: nostr,
            nostr_private_key: Secret::new("replay-private-key"),
        }
    }
}

/// Everything the bridge wrote during a replay.
#[derive(Debug)]
pub struct ReplayReport {
    pub platform_writes: Vec<CommentOp>,
    pub relay_events: Vec<SignedEvent>,
    pub status: BridgeStatus,
    pub settled: bool,
}

/// Run the bridge over `fixture` until both queues settle, `timeout`
/// passes, or the user interrupts.
pub async fn run(
    fixture: &Fixture,
    base: BridgeSettings,
    state_dir: PathBuf,
    timeout: Duration,
) -> Result<ReplayReport> {
    let settings = fixture.settings(base)?;
    let credentials = fixture.credentials();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();

    let relay = MemoryRelay::new(credentials.nostr_public_key.clone());
    for endpoint in &fixture.unreachable_relays {
        relay.set_unreachable(endpoint, true);
    }
    for event in &fixture.relay_events {
        relay.inject(RelayEvent {
            id: event.id.clone(),
            pubkey: credentials.nostr_public_key.clone(),
            kind: event.kind,
            content: event.content.clone(),
            tags: event.tags.clone(),
            created_at: now - chrono::Duration::seconds(event.age_secs),
        });
    }

    let platform = MemoryPlatform::with_clock(Arc::clone(&clock));
    for container in &fixture.containers {
        let venue = match &container.venue {
            Some(tag) => settings.venues.iter().find(|v| &v.tag == tag),
            None => settings.venues.first(),
        };
        let Some(venue) = venue else {
            bail!("Container {} names an unknown venue", container.permlink);
        };
        platform.add_post(PlatformPost {
            author: venue.operator.clone(),
            permlink: container.permlink.clone(),
            title: format!("{} container", venue.name),
            body: "Reply to this post".to_string(),
            parent_author: String::new(),
            parent_permlink: venue.tag.clone(),
            created: now - chrono::Duration::seconds(container.age_secs),
            json_metadata: serde_json::json!({ "tags": [venue.tag] }).to_string(),
        });
    }
    for post in &fixture.platform_posts {
        platform.add_post(PlatformPost {
            author: credentials.hive_username.clone(),
            permlink: post.permlink.clone(),
            title: post.title.clone(),
            body: post.body.clone(),
            parent_author: post.parent_author.clone(),
            parent_permlink: post.tags.first().cloned().unwrap_or_else(|| "blog".to_string()),
            created: now - chrono::Duration::seconds(post.age_secs),
            json_metadata: serde_json::json!({ "tags": post.tags }).to_string(),
        });
    }

    let supervisor = Arc::new(BridgeSupervisor::start(
        BridgeConfig::new(credentials, settings, state_dir),
        Arc::new(relay.clone()),
        Arc::new(platform.clone()),
        clock,
    )?);
    let mut events = supervisor.subscribe();

    let cancel = CancellationToken::new();
    let handle = {
        let supervisor = Arc::clone(&supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    };

    let deadline = tokio::time::Instant::now() + timeout;
    let mut settled_ticks = 0;
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
            _ = tokio::time::sleep(SETTLE_TICK) => {}
        }
        drain_events(&mut events);

        if handle.is_finished() {
            break;
        }
        if supervisor.status().is_settled() {
            settled_ticks += 1;
            if settled_ticks >= SETTLE_TICKS {
                break;
            }
        } else {
            settled_ticks = 0;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "Replay did not settle");
            break;
        }
    }

    cancel.cancel();
    handle.await.context("Bridge task failed")??;
    drain_events(&mut events);

    let status = supervisor.status();
    info!(interrupted, settled = status.is_settled(), "Replay finished");
    Ok(ReplayReport {
        platform_writes: platform.writes(),
        relay_events: relay.published_events(),
        settled: status.is_settled(),
        status,
    })
}

/// Print outcome lines for events seen so far.
fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<BridgeEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => print_event(&event),
            Err(TryRecvError::Lagged(missed)) => {
                warn!(missed, "Replay output skipped events");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
        }
    }
}

fn print_event(event: &BridgeEvent) {
    match event {
        BridgeEvent::Posted {
            direction,
            id,
            target,
        } => println!("[{}] posted {} as {}", direction.label(), id, target),
        BridgeEvent::Skipped {
            direction,
            id,
            reason,
        } => println!("[{}] skipped {}: {}", direction.label(), id, reason),
        BridgeEvent::Rejected {
            direction,
            id,
            message,
        } => println!("[{}] rejected {}: {}", direction.label(), id, message),
        BridgeEvent::Deferred {
            direction,
            id,
            wait,
        } => println!(
            "[{}] deferred {} for {}s",
            direction.label(),
            id,
            wait.as_secs()
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_defaults() {
        let fixture: Fixture = serde_json::from_str(r#"{"relay_events":[{"id":"a","content":"gm"}]}"#)
            .unwrap();
        assert_eq!(fixture.relay_events[0].kind, KIND_NOTE);
        assert_eq!(fixture.relay_events[0].age_secs, 0);
        assert!(fixture.platform_posts.is_empty());
        assert_eq!(fixture.credentials().hive_username, DEFAULT_HIVE_USER);
    }

    #[test]
    fn test_settings_overlay() {
        let fixture: Fixture =
            serde_json::from_str(r#"{"settings":{"min_publish_acks":1,"snap_quota":2}}"#).unwrap();
        let settings = fixture.settings(BridgeSettings::default()).unwrap();
        assert_eq!(settings.min_publish_acks, 1);
        assert_eq!(settings.snap_quota, 2);
        assert_eq!(settings.min_post_spacing_secs, 0);
        assert_eq!(settings.note_budget, BridgeSettings::default().note_budget);
    }

    #[test]
    fn test_settings_overlay_rejects_non_object() {
        let fixture: Fixture = serde_json::from_str(r#"{"settings":[1,2]}"#).unwrap();
        assert!(fixture.settings(BridgeSettings::default()).is_err());
    }
}
