//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hostr_core::events::SharedStatus;
use hostr_core::{
    BridgeConfig, BridgeContext, BridgeSettings, BridgeStatus, Clock, ContentKind, Credentials,
    MemoryPlatform, MemoryRelay, PlatformPost, QueueItem, RelayEvent, Secret,
};

pub const HIVE_USER: &str = "alice";
pub const NOSTR_PUBKEY: &str = "a11ce0000000000000000000000000000000000000000000000000000000beef";
pub const VENUE_TAG: &str = "peak.snaps";
pub const CONTAINER: &str = "venue-x";

pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

pub fn credentials() -> Credentials {
    Credentials {
        hive_username: HIVE_USER.to_string(),
        hive_posting_key: Secret::new("5Kposting"),
        nostr_public_key: NOSTR_PUBKEY.to_string(),
        nostr_private_key: Secret::new("nsec-test"),
    }
}

/// Defaults with three relays and a UTC quota day.
pub fn settings() -> BridgeSettings {
    BridgeSettings {
        relays: vec![
            "wss://one.test".to_string(),
            "wss://two.test".to_string(),
            "wss://three.test".to_string(),
        ],
        min_publish_acks: 2,
        quota_utc_offset_minutes: Some(0),
        ..BridgeSettings::default()
    }
}

pub fn config(settings: BridgeSettings, state_dir: &Path) -> BridgeConfig {
    BridgeConfig::new(credentials(), settings, state_dir.to_path_buf())
}

pub fn context(
    settings: BridgeSettings,
    state_dir: &Path,
    relay: &MemoryRelay,
    platform: &MemoryPlatform,
    clock: Arc<dyn Clock>,
) -> BridgeContext {
    BridgeContext::new(
        config(settings, state_dir),
        Arc::new(relay.clone()),
        Arc::new(platform.clone()),
        clock,
    )
    .unwrap()
}

/// A venue container published by the venue operator.
pub fn container(permlink: &str, created: DateTime<Utc>) -> PlatformPost {
    PlatformPost {
        author: VENUE_TAG.to_string(),
        permlink: permlink.to_string(),
        title: "Snaps container".to_string(),
        body: "Reply here".to_string(),
        parent_author: String::new(),
        parent_permlink: VENUE_TAG.to_string(),
        created,
        json_metadata: r#"{"tags":["peak.snaps"]}"#.to_string(),
    }
}

/// A root post in the bridged account's blog.
pub fn hive_post(permlink: &str, body: &str, created: DateTime<Utc>) -> PlatformPost {
    PlatformPost {
        author: HIVE_USER.to_string(),
        permlink: permlink.to_string(),
        title: String::new(),
        body: body.to_string(),
        parent_author: String::new(),
        parent_permlink: "hive-blog".to_string(),
        created,
        json_metadata: r#"{"tags":["life"]}"#.to_string(),
    }
}

/// A note authored by the bridged Nostr key.
pub fn nostr_note(id: &str, content: &str, created_at: DateTime<Utc>) -> RelayEvent {
    RelayEvent {
        id: id.to_string(),
        pubkey: NOSTR_PUBKEY.to_string(),
        kind: 1,
        content: content.to_string(),
        tags: Vec::new(),
        created_at,
    }
}

pub fn short_item(id: &str, content: &str) -> QueueItem {
    QueueItem {
        source_id: id.to_string(),
        content: content.to_string(),
        kind: ContentKind::Short,
        tags: Vec::new(),
        title: None,
        author: NOSTR_PUBKEY.to_string(),
        created_at: origin(),
        enqueued_at: origin(),
        attempts: 0,
    }
}

pub fn hive_item(permlink: &str, body: &str) -> QueueItem {
    QueueItem {
        source_id: permlink.to_string(),
        content: body.to_string(),
        kind: ContentKind::Short,
        tags: Vec::new(),
        title: None,
        author: HIVE_USER.to_string(),
        created_at: origin(),
        enqueued_at: origin(),
        attempts: 0,
    }
}

/// Poll `status` until `done` holds. Under a paused runtime this advances
/// virtual time in one-second steps.
pub async fn wait_for(status: &SharedStatus, done: impl Fn(&BridgeStatus) -> bool) {
    tokio::time::timeout(Duration::from_secs(7 * 24 * 3600), async {
        loop {
            if done(&status.read()) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}
