//! Edge case and boundary condition tests
//!
//! Listener decisions at their boundaries, startup with bad state, and
//! relays that deliver the same event more than once.

mod common;

use std::sync::Arc;

use common::*;
use futures::future::join_all;
use hostr_core::listener::{PlatformPoller, RelayListener};
use hostr_core::net::RelayTransport;
use hostr_core::transform::SOURCE_TAG;
use hostr_core::{
    BridgeContext, BridgeError, BridgeSettings, Clock, EventDraft, ManualClock, MemoryPlatform,
    MemoryRelay, ProcessedLedger, RateGate, Secret, SkipReason, SubscriptionMessage,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

// ============================================================================
// Test Utilities
// ============================================================================

struct Listeners {
    ctx: Arc<BridgeContext>,
    clock: Arc<ManualClock>,
    relay_listener: RelayListener,
    poller: PlatformPoller,
    _dir: TempDir,
}

fn listeners(settings: BridgeSettings) -> Listeners {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(origin()));
    let relay = MemoryRelay::new(NOSTR_PUBKEY);
    let platform = MemoryPlatform::new();
    let ctx = Arc::new(context(
        settings,
        dir.path(),
        &relay,
        &platform,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let (to_platform, _) = mpsc::channel(8);
    let (to_relay, _) = mpsc::channel(8);
    Listeners {
        relay_listener: RelayListener::new(Arc::clone(&ctx), to_platform),
        poller: PlatformPoller::new(Arc::clone(&ctx), to_relay),
        ctx,
        clock,
        _dir: dir,
    }
}

// ============================================================================
// Relay Listener Decisions
// ============================================================================

#[test]
fn test_event_exactly_at_recency_threshold_is_dropped() {
    let l = listeners(settings());
    let note = nostr_note("edge", "hello", origin() - chrono::Duration::seconds(300));
    assert_eq!(
        l.relay_listener.evaluate(&note).unwrap_err(),
        SkipReason::TooOld { age_secs: 300 }
    );

    let fresh = nostr_note("edge", "hello", origin() - chrono::Duration::seconds(299));
    assert!(l.relay_listener.evaluate(&fresh).is_ok());
}

#[test]
fn test_historical_marker_formats_are_recognized() {
    let l = listeners(settings());
    let bodies = [
        "gm\n\nAuto cross-post from hive via Hostr bridge v0.9.1 (lf)",
        "gm\n\nView the original article over on Nostr",
        "gm\n\nOriginally posted on Hive at https://hive.blog/@alice/gm",
        "gm\n\n*This article originated on nostr*",
        "gm... read full note: https://peakd.com/@alice/gm",
    ];
    for (n, body) in bodies.iter().enumerate() {
        let note = nostr_note(&format!("m{n}"), body, origin());
        assert!(
            matches!(
                l.relay_listener.evaluate(&note),
                Err(SkipReason::LoopMarker(_))
            ),
            "not recognized: {body}"
        );
    }
}

#[test]
fn test_source_tag_alone_marks_event() {
    let l = listeners(settings());
    let mut note = nostr_note("tagged", "plain words", origin());
    note.tags = vec![vec![SOURCE_TAG.to_string(), "hive:0011223344556677".to_string()]];
    assert_eq!(
        l.relay_listener.evaluate(&note).unwrap_err(),
        SkipReason::LoopMarker("metadata")
    );
}

#[test]
fn test_p_tagged_note_is_a_reply_but_article_is_not() {
    let l = listeners(settings());
    let mut note = nostr_note("mention", "hey", origin());
    note.tags = vec![vec!["p".to_string(), "someone".to_string()]];
    assert_eq!(l.relay_listener.evaluate(&note).unwrap_err(), SkipReason::Reply);

    note.kind = 30023;
    note.id = "article".to_string();
    assert!(l.relay_listener.evaluate(&note).is_ok());
}

#[test]
fn test_unsupported_kind_is_dropped() {
    let l = listeners(settings());
    let mut reaction = nostr_note("reaction", "+", origin());
    reaction.kind = 7;
    assert_eq!(
        l.relay_listener.evaluate(&reaction).unwrap_err(),
        SkipReason::UnsupportedKind(7)
    );
}

#[test]
fn test_opt_out_is_case_insensitive() {
    let l = listeners(settings());
    let note = nostr_note("private", "Keep this here #NoBridge", origin());
    assert!(matches!(
        l.relay_listener.evaluate(&note),
        Err(SkipReason::OptOut(_))
    ));
}

#[test]
fn test_ledgered_event_is_dropped() {
    let l = listeners(settings());
    l.ctx
        .to_platform_ledger
        .lock()
        .mark_processed("seen", origin())
        .unwrap();
    let note = nostr_note("seen", "again", origin());
    assert_eq!(
        l.relay_listener.evaluate(&note).unwrap_err(),
        SkipReason::AlreadyProcessed
    );
}

#[test]
fn test_long_note_is_classified_long() {
    let l = listeners(settings());
    let note = nostr_note("long", &"x".repeat(486), origin());
    let item = l.relay_listener.evaluate(&note).unwrap();
    assert_eq!(item.kind, hostr_core::ContentKind::Long);

    let note = nostr_note("short", &"x".repeat(485), origin());
    let item = l.relay_listener.evaluate(&note).unwrap();
    assert_eq!(item.kind, hostr_core::ContentKind::Short);
}

// ============================================================================
// Hive Poller Decisions
// ============================================================================

#[test]
fn test_poller_rejects_foreign_comment_and_empty_posts() {
    let l = listeners(settings());

    let mut foreign = hive_post("p1", "hi", origin());
    foreign.author = "bob".to_string();
    assert_eq!(l.poller.evaluate(&foreign).unwrap_err(), SkipReason::NotAuthor);

    let mut comment = hive_post("p2", "nice post", origin());
    comment.parent_author = "bob".to_string();
    assert_eq!(l.poller.evaluate(&comment).unwrap_err(), SkipReason::Comment);

    let empty = hive_post("p3", "   \n", origin());
    assert_eq!(l.poller.evaluate(&empty).unwrap_err(), SkipReason::EmptyBody);
}

#[test]
fn test_poller_detects_metadata_marker() {
    let l = listeners(settings());
    let mut post = hive_post("bridged", "just words", origin());
    post.json_metadata = r#"{"tags":["hostr"],"app":"hostr-snaps/1.0"}"#.to_string();
    assert_eq!(
        l.poller.evaluate(&post).unwrap_err(),
        SkipReason::LoopMarker("metadata")
    );
}

#[test]
fn test_poller_recency_follows_clock() {
    let l = listeners(settings());
    let post = hive_post("aging", "fresh words", origin());
    assert!(l.poller.evaluate(&post).is_ok());

    l.clock.advance(chrono::Duration::minutes(5));
    assert_eq!(
        l.poller.evaluate(&post).unwrap_err(),
        SkipReason::TooOld { age_secs: 300 }
    );
}

#[test]
fn test_titled_post_keeps_title() {
    let l = listeners(settings());
    let mut post = hive_post("titled", "Body text", origin());
    post.title = "  My Title  ".to_string();
    let item = l.poller.evaluate(&post).unwrap();
    assert_eq!(item.title.as_deref(), Some("My Title"));
    assert_eq!(item.kind, hostr_core::ContentKind::Long);
    assert_eq!(item.tags, vec![vec!["t".to_string(), "life".to_string()]]);
}

// ============================================================================
// Startup State
// ============================================================================

#[test]
fn test_corrupt_ledger_stops_startup() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("processed_permlinks.json"), "[[\"a\", 1").unwrap();

    let result = BridgeContext::new(
        config(settings(), dir.path()),
        Arc::new(MemoryRelay::new(NOSTR_PUBKEY)),
        Arc::new(MemoryPlatform::new()),
        Arc::new(ManualClock::new(origin())),
    );
    assert!(matches!(result, Err(BridgeError::CorruptState { .. })));
}

#[test]
fn test_invalid_settings_stop_startup() {
    let dir = TempDir::new().unwrap();
    let result = BridgeContext::new(
        config(
            BridgeSettings {
                relays: Vec::new(),
                ..settings()
            },
            dir.path(),
        ),
        Arc::new(MemoryRelay::new(NOSTR_PUBKEY)),
        Arc::new(MemoryPlatform::new()),
        Arc::new(ManualClock::new(origin())),
    );
    assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
}

#[test]
fn test_startup_loads_legacy_ledger_and_prunes_expired() {
    let dir = TempDir::new().unwrap();
    let week_old = (origin() - chrono::Duration::days(8)).timestamp_millis();
    let recent = (origin() - chrono::Duration::hours(1)).timestamp_millis();
    std::fs::write(
        dir.path().join("processed_nostr_events.json"),
        format!(r#"["bare-id", ["old-id", {week_old}], ["new-id", {recent}]]"#),
    )
    .unwrap();

    let ctx = BridgeContext::new(
        config(settings(), dir.path()),
        Arc::new(MemoryRelay::new(NOSTR_PUBKEY)),
        Arc::new(MemoryPlatform::new()),
        Arc::new(ManualClock::new(origin())),
    )
    .unwrap();

    let ledger = ctx.to_platform_ledger.lock();
    assert!(ledger.has("bare-id"));
    assert!(ledger.has("new-id"));
    assert!(!ledger.has("old-id"));
    drop(ledger);

    let reloaded =
        ProcessedLedger::load_from_disk(dir.path().join("processed_nostr_events.json"), origin())
            .unwrap();
    assert_eq!(reloaded.len(), 2);
}

#[test]
fn test_rate_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let settings = settings();
    {
        let mut gate = RateGate::for_platform(&settings, dir.path()).unwrap();
        gate.record_post(hostr_core::Category::Snap, origin()).unwrap();
    }
    let gate = RateGate::for_platform(&settings, dir.path()).unwrap();
    let decision = gate.can_post_now(
        hostr_core::Category::Snap,
        origin() + chrono::Duration::seconds(60),
    );
    assert_eq!(decision.wait(), std::time::Duration::from_secs(240));
    assert_eq!(gate.daily_count(hostr_core::Category::Snap, origin()), 1);
}

// ============================================================================
// Relay Delivery
// ============================================================================

#[tokio::test]
async fn test_event_published_to_many_relays_is_delivered_once() {
    let relay = MemoryRelay::new(NOSTR_PUBKEY);
    let endpoints: Vec<String> = settings().relays;
    let filter = hostr_core::RelayFilter {
        kinds: vec![1],
        authors: vec![NOSTR_PUBKEY.to_string()],
        since: origin() - chrono::Duration::minutes(5),
    };
    let mut sub = relay.subscribe(&endpoints, &filter).await.unwrap();
    assert!(matches!(
        sub.recv().await,
        Some(SubscriptionMessage::EndOfStored)
    ));

    let signed = relay
        .sign(
            EventDraft {
                kind: 1,
                content: "one note".to_string(),
                tags: Vec::new(),
                created_at: origin(),
            },
            &Secret::new("nsec-test"),
        )
        .await
        .unwrap();

    let results = join_all(endpoints.iter().map(|e| relay.publish(e, &signed))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(relay.published().len(), 3);
    assert_eq!(relay.published_events().len(), 1);

    assert!(matches!(sub.recv().await, Some(SubscriptionMessage::Event(e)) if e.id == signed.event.id));
    sub.close();
    assert!(sub.is_closed());
}
