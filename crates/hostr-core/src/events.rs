//! Bridge events and status tracking
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  BridgeEvent: broadcast to any subscriber                       │
//! │  ├── Enqueued / Skipped: listener decisions                     │
//! │  ├── Posted / Deferred / Retrying / Rejected: worker outcomes   │
//! │  └── ListenerStatus / ListenerRestarted: supervision            │
//! │                                                                 │
//! │  BridgeStatus: shared snapshot for heartbeat and CLI            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::FailureClass;
use crate::types::{Category, Direction};

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State of one source listener.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListenerStatus {
    /// Not started
    #[default]
    Idle,
    /// Opening relay connections
    Connecting,
    /// Subscription open on `relays` endpoints
    Listening {
        /// Relays that accepted the connection
        relays: usize,
    },
    /// Polling the Hive feed
    Polling,
    /// Waiting before a retry
    Backoff {
        /// Seconds until the retry
        retry_in_secs: u64,
    },
    /// Stopped with an error
    Error(String),
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerStatus::Idle => write!(f, "Idle"),
            ListenerStatus::Connecting => write!(f, "Connecting"),
            ListenerStatus::Listening { relays } => write!(f, "Listening ({} relays)", relays),
            ListenerStatus::Polling => write!(f, "Polling"),
            ListenerStatus::Backoff { retry_in_secs } => {
                write!(f, "Backoff (retry in {}s)", retry_in_secs)
            }
            ListenerStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Why a listener or worker dropped an item without writing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Older than the recency window
    TooOld {
        /// Age in seconds
        age_secs: i64,
    },
    /// Carries a loop marker
    LoopMarker(&'static str),
    /// Contains a do-not-bridge keyword
    OptOut(String),
    /// A kind-1 reply or mention
    Reply,
    /// Kind not mirrored
    UnsupportedKind(u16),
    /// Already in the ledger
    AlreadyProcessed,
    /// Already waiting in the queue
    AlreadyQueued,
    /// Not written by the bridged account
    NotAuthor,
    /// A Hive comment rather than a post
    Comment,
    /// No body
    EmptyBody,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooOld { age_secs } => write!(f, "too old ({}s)", age_secs),
            SkipReason::LoopMarker(name) => write!(f, "cross-post marker ({})", name),
            SkipReason::OptOut(keyword) => write!(f, "opt-out keyword {}", keyword),
            SkipReason::Reply => write!(f, "reply"),
            SkipReason::UnsupportedKind(kind) => write!(f, "unsupported kind {}", kind),
            SkipReason::AlreadyProcessed => write!(f, "already processed"),
            SkipReason::AlreadyQueued => write!(f, "already queued"),
            SkipReason::NotAuthor => write!(f, "not authored by bridged account"),
            SkipReason::Comment => write!(f, "comment"),
            SkipReason::EmptyBody => write!(f, "empty body"),
        }
    }
}

/// Events emitted while the bridge runs
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A listener handed an item to its queue
    Enqueued {
        direction: Direction,
        id: String,
    },
    /// An item was dropped without a write
    Skipped {
        direction: Direction,
        id: String,
        reason: SkipReason,
    },
    /// An item was written
    Posted {
        direction: Direction,
        id: String,
        /// Permlink or event id of the written copy
        target: String,
    },
    /// The rate gate or container lookup held the head back
    Deferred {
        direction: Direction,
        id: String,
        wait: Duration,
    },
    /// A write failed and will be retried
    Retrying {
        direction: Direction,
        id: String,
        class: FailureClass,
        delay: Duration,
    },
    /// A write failed permanently; the item is marked processed
    Rejected {
        direction: Direction,
        id: String,
        message: String,
    },
    /// A listener changed state
    ListenerStatus {
        direction: Direction,
        status: ListenerStatus,
    },
    /// The listener pair was restarted
    ListenerRestarted {
        attempt: u32,
    },
}

impl BridgeEvent {
    /// Direction the event concerns, if any.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            BridgeEvent::Enqueued { direction, .. }
            | BridgeEvent::Skipped { direction, .. }
            | BridgeEvent::Posted { direction, .. }
            | BridgeEvent::Deferred { direction, .. }
            | BridgeEvent::Retrying { direction, .. }
            | BridgeEvent::Rejected { direction, .. }
            | BridgeEvent::ListenerStatus { direction, .. } => Some(*direction),
            BridgeEvent::ListenerRestarted { .. } => None,
        }
    }

    /// Source id the event concerns, if any.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::Enqueued { id, .. }
            | BridgeEvent::Skipped { id, .. }
            | BridgeEvent::Posted { id, .. }
            | BridgeEvent::Deferred { id, .. }
            | BridgeEvent::Retrying { id, .. }
            | BridgeEvent::Rejected { id, .. } => Some(id),
            BridgeEvent::ListenerStatus { .. } | BridgeEvent::ListenerRestarted { .. } => None,
        }
    }
}

/// Sender half of the event channel.
pub type EventSender = broadcast::Sender<BridgeEvent>;

/// Publish an event; having no subscribers is fine.
pub(crate) fn emit(tx: &EventSender, event: BridgeEvent) {
    let _ = tx.send(event);
}

/// Counters for one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items currently queued in the worker
    pub depth: usize,
    /// Items handed over by listeners
    pub accepted: u64,
    /// Items that reached a terminal outcome (posted, rejected, dropped)
    pub settled: u64,
    /// Successful writes
    pub posted: u64,
    /// Permanent failures
    pub rejected: u64,
    /// Retries scheduled
    pub retries: u64,
    /// Writes per category today, as seen by the rate gate
    pub daily: BTreeMap<Category, u32>,
}

impl QueueStats {
    /// Nothing queued and nothing in transit from a listener.
    pub fn is_drained(&self) -> bool {
        self.depth == 0 && self.accepted == self.settled
    }
}

/// Snapshot of the whole bridge.
#[derive(Debug, Clone, Default)]
pub struct BridgeStatus {
    /// Nostr → Hive queue
    pub to_platform: QueueStats,
    /// Hive → Nostr queue
    pub to_relay: QueueStats,
    /// Relay subscription listener
    pub relay_listener: ListenerStatus,
    /// Hive feed poller
    pub platform_listener: ListenerStatus,
    /// Completed feed polls
    pub polls: u64,
    /// Subscriptions opened
    pub subscriptions: u64,
    /// Listener pair restarts
    pub restarts: u32,
}

impl BridgeStatus {
    pub fn queue(&self, direction: Direction) -> &QueueStats {
        match direction {
            Direction::ToPlatform => &self.to_platform,
            Direction::ToRelay => &self.to_relay,
        }
    }

    pub fn queue_mut(&mut self, direction: Direction) -> &mut QueueStats {
        match direction {
            Direction::ToPlatform => &mut self.to_platform,
            Direction::ToRelay => &mut self.to_relay,
        }
    }

    /// Both listeners have produced at least once and both queues are drained.
    pub fn is_settled(&self) -> bool {
        self.polls > 0
            && self.subscriptions > 0
            && self.to_platform.is_drained()
            && self.to_relay.is_drained()
    }
}

/// Status shared between the supervisor, listeners and workers.
pub type SharedStatus = Arc<RwLock<BridgeStatus>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_status_default_is_idle() {
        let status: ListenerStatus = Default::default();
        assert_eq!(status, ListenerStatus::Idle);
    }

    #[test]
    fn test_listener_status_display() {
        assert_eq!(
            format!("{}", ListenerStatus::Listening { relays: 7 }),
            "Listening (7 relays)"
        );
        assert_eq!(
            format!("{}", ListenerStatus::Backoff { retry_in_secs: 120 }),
            "Backoff (retry in 120s)"
        );
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::LoopMarker("footer").to_string(),
            "cross-post marker (footer)"
        );
        assert_eq!(SkipReason::TooOld { age_secs: 301 }.to_string(), "too old (301s)");
    }

    #[test]
    fn test_event_accessors() {
        let event = BridgeEvent::Posted {
            direction: Direction::ToPlatform,
            id: "abc".into(),
            target: "hostr-snap-1".into(),
        };
        assert_eq!(event.direction(), Some(Direction::ToPlatform));
        assert_eq!(event.source_id(), Some("abc"));
        assert_eq!(BridgeEvent::ListenerRestarted { attempt: 1 }.direction(), None);
    }

    #[test]
    fn test_status_settled() {
        let mut status = BridgeStatus::default();
        assert!(!status.is_settled());
        status.polls = 1;
        status.subscriptions = 1;
        assert!(status.is_settled());
        status.queue_mut(Direction::ToRelay).accepted = 1;
        assert!(!status.is_settled());
        status.queue_mut(Direction::ToRelay).settled = 1;
        assert!(status.is_settled());
    }
}
