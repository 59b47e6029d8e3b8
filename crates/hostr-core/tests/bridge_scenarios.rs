//! Full Bridge Scenario Tests
//!
//! Runs the [`BridgeSupervisor`] with both listeners and both workers
//! against the in-memory relay pool and Hive node. The relay pool echoes
//! every publish back to live subscriptions and the Hive feed returns the
//! bridge's own writes, so loop prevention is exercised end to end.
//! Relay outages and error notices drive the listener's reconnect paths.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use hostr_core::{
    BridgeError, BridgeEvent, BridgeResult, BridgeSettings, BridgeSupervisor, Clock, CommentOp,
    BroadcastReceipt, ListenerStatus, MemoryPlatform, MemoryRelay, PlatformClient, PlatformError,
    PlatformPost, Secret, SkipReason, TokioClock,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Utilities
// ============================================================================

struct Bridge {
    supervisor: Arc<BridgeSupervisor>,
    relay: MemoryRelay,
    platform: MemoryPlatform,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    handle: JoinHandle<BridgeResult<()>>,
    _dir: TempDir,
}

impl Bridge {
    fn status(&self) -> &hostr_core::events::SharedStatus {
        &self.supervisor.context().status
    }

    async fn stop(self) -> BridgeResult<()> {
        self.cancel.cancel();
        self.handle.await.unwrap()
    }
}

fn start_bridge(settings: BridgeSettings) -> Bridge {
    start_bridge_with(settings, MemoryRelay::new(NOSTR_PUBKEY))
}

fn start_bridge_with(settings: BridgeSettings, relay: MemoryRelay) -> Bridge {
    let dir = TempDir::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(origin()));
    let platform = MemoryPlatform::with_clock(Arc::clone(&clock));
    platform.add_post(container(CONTAINER, origin() - chrono::Duration::hours(1)));

    let supervisor = Arc::new(
        BridgeSupervisor::start(
            config(settings, dir.path()),
            Arc::new(relay.clone()),
            Arc::new(platform.clone()),
            Arc::clone(&clock),
        )
        .unwrap(),
    );
    let cancel = CancellationToken::new();
    let handle = {
        let supervisor = Arc::clone(&supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    };

    Bridge {
        supervisor,
        relay,
        platform,
        clock,
        cancel,
        handle,
        _dir: dir,
    }
}

async fn wait_until_listening(bridge: &Bridge) {
    wait_for(bridge.status(), |s| {
        matches!(s.relay_listener, ListenerStatus::Listening { .. }) && s.polls > 0
    })
    .await;
}

/// Hive node whose feed query panics a set number of times.
struct PanickingFeed {
    inner: MemoryPlatform,
    panics_left: AtomicUsize,
}

#[async_trait]
impl PlatformClient for PanickingFeed {
    async fn query_latest_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<PlatformPost>, PlatformError> {
        self.inner.query_latest_by_tag(tag, limit).await
    }

    async fn query_author_feed(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<PlatformPost>, PlatformError> {
        let left = self.panics_left.load(Ordering::SeqCst);
        if left > 0 {
            self.panics_left.store(left - 1, Ordering::SeqCst);
            panic!("feed decoder blew up");
        }
        self.inner.query_author_feed(author, limit).await
    }

    async fn broadcast_write(
        &self,
        op: &CommentOp,
        posting_key: &Secret,
    ) -> Result<BroadcastReceipt, PlatformError> {
        self.inner.broadcast_write(op, posting_key).await
    }
}

fn start_with_feed(settings: BridgeSettings, panics: usize) -> (Bridge, Arc<PanickingFeed>) {
    let dir = TempDir::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(origin()));
    let relay = MemoryRelay::new(NOSTR_PUBKEY);
    let platform = MemoryPlatform::with_clock(Arc::clone(&clock));
    let feed = Arc::new(PanickingFeed {
        inner: platform.clone(),
        panics_left: AtomicUsize::new(panics),
    });

    let supervisor = Arc::new(
        BridgeSupervisor::start(
            config(settings, dir.path()),
            Arc::new(relay.clone()),
            Arc::clone(&feed) as Arc<dyn PlatformClient>,
            Arc::clone(&clock),
        )
        .unwrap(),
    );
    let cancel = CancellationToken::new();
    let handle = {
        let supervisor = Arc::clone(&supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    };

    (
        Bridge {
            supervisor,
            relay,
            platform,
            clock,
            cancel,
            handle,
            _dir: dir,
        },
        feed,
    )
}

// ============================================================================
// Nostr -> Hive
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_nostr_note_mirrors_once() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;

    let note = nostr_note("ev-1", "gm from nostr", bridge.clock.now());
    bridge.relay.inject(note.clone());
    wait_for(bridge.status(), |s| s.to_platform.posted == 1).await;

    // relays replay stored events on every resubscribe
    bridge.relay.inject(note);
    tokio::time::sleep(Duration::from_secs(600)).await;

    let writes = bridge.platform.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].body.starts_with("gm from nostr"));
    assert_eq!(writes[0].parent_permlink, CONTAINER);

    let status = bridge.supervisor.status();
    assert_eq!(status.to_platform.accepted, 1);
    assert!(bridge.relay.published_events().is_empty());
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_replies_and_opt_outs_are_not_mirrored() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;
    let mut events = bridge.supervisor.subscribe();

    let mut reply = nostr_note("reply-1", "agreed!", bridge.clock.now());
    reply.tags = vec![vec!["e".to_string(), "parent".to_string()]];
    bridge.relay.inject(reply);
    bridge.relay.inject(nostr_note(
        "private-1",
        "just for nostr #nobridge",
        bridge.clock.now(),
    ));

    let mut reasons = Vec::new();
    while reasons.len() < 2 {
        if let BridgeEvent::Skipped { reason, .. } = events.recv().await.unwrap() {
            reasons.push(reason);
        }
    }
    assert!(reasons.contains(&SkipReason::Reply));
    assert!(reasons
        .iter()
        .any(|r| matches!(r, SkipReason::OptOut(k) if k == "#nobridge")));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(bridge.platform.writes().is_empty());
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_events_are_dropped() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;

    let old = nostr_note(
        "old-1",
        "yesterday's news",
        bridge.clock.now() - chrono::Duration::seconds(300),
    );
    bridge.relay.inject(old);
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert!(bridge.platform.writes().is_empty());
    assert_eq!(bridge.supervisor.status().to_platform.accepted, 0);
    bridge.stop().await.unwrap();
}

// ============================================================================
// Hive -> Nostr
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_hive_post_mirrors_once_and_echo_is_ignored() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;
    let mut events = bridge.supervisor.subscribe();

    bridge
        .platform
        .add_post(hive_post("fresh-post", "Hello from Hive", bridge.clock.now()));
    wait_for(bridge.status(), |s| s.to_relay.posted == 1).await;

    // the published note comes straight back over the live subscription
    let echo = loop {
        if let BridgeEvent::Skipped {
            reason: SkipReason::LoopMarker(marker),
            ..
        } = events.recv().await.unwrap()
        {
            break marker;
        }
    };
    assert!(!echo.is_empty());

    tokio::time::sleep(Duration::from_secs(900)).await;

    let published = bridge.relay.published_events();
    assert_eq!(published.len(), 1);
    assert!(published[0]
        .event
        .content
        .contains("Originally posted on Hive at https://peakd.com/@alice/fresh-post"));
    assert!(bridge.platform.writes().is_empty());

    let status = bridge.supervisor.status();
    assert_eq!(status.to_relay.accepted, 1);
    assert_eq!(status.to_platform.accepted, 0);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bridged_longform_is_not_mirrored_back() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;

    let mut article = nostr_note("article-1", &"Deep thoughts. ".repeat(60), bridge.clock.now());
    article.kind = 30023;
    article.tags = vec![vec!["title".to_string(), "Deep".to_string()]];
    bridge.relay.inject(article);

    wait_for(bridge.status(), |s| s.to_platform.posted == 1).await;
    // the top-level post now sits in the account's own feed
    tokio::time::sleep(Duration::from_secs(600)).await;

    let writes = bridge.platform.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].parent_author, "");
    assert!(bridge.relay.published_events().is_empty());
    assert_eq!(bridge.supervisor.status().to_relay.accepted, 0);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_both_directions_settle() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;

    bridge
        .relay
        .inject(nostr_note("ev-both", "from nostr", bridge.clock.now()));
    bridge
        .platform
        .add_post(hive_post("both-post", "from hive", bridge.clock.now()));

    wait_for(bridge.status(), |s| {
        s.to_platform.posted == 1 && s.to_relay.posted == 1
    })
    .await;
    assert!(bridge.supervisor.status().is_settled());
    bridge.stop().await.unwrap();
}

// ============================================================================
// Relay recovery
// ============================================================================

const RELAYS: [&str; 3] = ["wss://one.test", "wss://two.test", "wss://three.test"];

fn backing_off(status: &hostr_core::BridgeStatus, secs: u64) -> bool {
    status.relay_listener == ListenerStatus::Backoff { retry_in_secs: secs }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_relays_back_off_before_reconnecting() {
    let relay = MemoryRelay::new(NOSTR_PUBKEY);
    for endpoint in RELAYS {
        relay.set_unreachable(endpoint, true);
    }
    let bridge = start_bridge_with(settings(), relay);

    wait_for(bridge.status(), |s| backing_off(s, 120)).await;
    let backoff_seen = tokio::time::Instant::now();
    assert_eq!(bridge.relay.connect_count(), 0);
    assert_eq!(bridge.relay.subscription_count(), 0);

    for endpoint in RELAYS {
        bridge.relay.set_unreachable(endpoint, false);
    }
    wait_until_listening(&bridge).await;
    assert!(backoff_seen.elapsed() >= Duration::from_secs(118));
    assert_eq!(bridge.relay.connect_count(), 3);
    assert_eq!(bridge.relay.subscription_count(), 1);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subscription_refreshes_every_minute() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;
    assert_eq!(bridge.relay.subscription_count(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(bridge.relay.subscription_count(), 2);
    assert_eq!(bridge.relay.connect_count(), 6);
    assert_eq!(bridge.relay.live_subscriptions(), 1);
    assert_eq!(bridge.supervisor.status().subscriptions, 2);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inactive_subscription_notice_reopens_quickly() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;

    bridge.relay.inject_error("CLOSED: no active subscription");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(bridge.relay.subscription_count(), 2);
    assert_eq!(bridge.relay.live_subscriptions(), 1);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subscription_error_waits_full_retry() {
    let bridge = start_bridge(settings());
    wait_until_listening(&bridge).await;

    bridge.relay.inject_error("rate-limited: slow down");
    wait_for(bridge.status(), |s| backing_off(s, 120)).await;
    assert_eq!(bridge.relay.live_subscriptions(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(bridge.relay.subscription_count(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(bridge.relay.subscription_count(), 2);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscribe_retries_later() {
    let relay = MemoryRelay::new(NOSTR_PUBKEY);
    relay.fail_next_subscribe("relay overloaded");
    let bridge = start_bridge_with(settings(), relay);

    wait_for(bridge.status(), |s| backing_off(s, 120)).await;
    let backoff_seen = tokio::time::Instant::now();
    assert_eq!(bridge.relay.connect_count(), 3);
    assert_eq!(bridge.relay.subscription_count(), 0);

    wait_until_listening(&bridge).await;
    assert!(backoff_seen.elapsed() >= Duration::from_secs(118));
    assert_eq!(bridge.relay.subscription_count(), 1);
    bridge.stop().await.unwrap();
}

// ============================================================================
// Supervision
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_listener_panic_restarts_pair() {
    let (bridge, feed) = start_with_feed(settings(), 1);
    bridge
        .platform
        .add_post(container(CONTAINER, origin() - chrono::Duration::hours(1)));

    wait_for(bridge.status(), |s| s.restarts == 1 && s.polls > 0).await;
    assert_eq!(feed.panics_left.load(Ordering::SeqCst), 0);

    bridge
        .platform
        .add_post(hive_post("after-restart", "still bridging", bridge.clock.now()));
    wait_for(bridge.status(), |s| s.to_relay.posted == 1).await;
    assert_eq!(bridge.supervisor.status().restarts, 1);
    bridge.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restart_budget_exhaustion_stops_supervisor() {
    let settings = BridgeSettings {
        max_restarts: 2,
        ..settings()
    };
    let (bridge, _feed) = start_with_feed(settings, usize::MAX);
    let mut events = bridge.supervisor.subscribe();

    let result = tokio::time::timeout(Duration::from_secs(3600), bridge.handle)
        .await
        .expect("supervisor should give up")
        .unwrap();
    assert!(matches!(result, Err(BridgeError::RestartLimit(2))));

    let mut attempts = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BridgeEvent::ListenerRestarted { attempt } = event {
            attempts.push(attempt);
        }
    }
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_cleanly_with_pending_items() {
    let settings = BridgeSettings {
        min_post_spacing_secs: 3600,
        ..settings()
    };
    let bridge = start_bridge(settings);
    wait_until_listening(&bridge).await;

    bridge
        .relay
        .inject(nostr_note("first", "one", bridge.clock.now()));
    bridge
        .relay
        .inject(nostr_note("second", "two", bridge.clock.now()));
    wait_for(bridge.status(), |s| {
        s.to_platform.posted == 1 && s.to_platform.depth == 1
    })
    .await;

    bridge.stop().await.unwrap();
}
