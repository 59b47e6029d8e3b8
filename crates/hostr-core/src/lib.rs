//! Hostr Core Library
//!
//! Bidirectional cross-posting bridge between a Nostr identity and a Hive
//! account.
//!
//! ## Overview
//!
//! Two independent pipelines run side by side:
//!
//! - **nostr->hive**: a relay subscription feeds short notes and long-form
//!   articles into a queue; short items become snaps under the current venue
//!   container, long items become top-level posts.
//! - **hive->nostr**: the account's blog feed is polled and new root posts
//!   are published to the configured relays as notes.
//!
//! Every mirrored body carries a loop marker so the bridge never re-mirrors
//! its own output, and every source id is recorded in a persistent ledger so
//! a restart never double-posts. Hive writes are spaced by a persistent rate
//! gate.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hostr_core::{BridgeConfig, BridgeSettings, BridgeSupervisor, Credentials, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::new(
//!         Credentials::from_env()?,
//!         BridgeSettings::default(),
//!         "~/.hostr/state".into(),
//!     );
//!     let supervisor = BridgeSupervisor::start(config, relay, platform, Arc::new(SystemClock))?;
//!     supervisor.run_until_ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod ledger;
pub mod listener;
pub mod logging;
pub mod net;
pub mod queue;
pub mod rate;
pub mod retry;
pub mod supervisor;
pub mod transform;
pub mod types;
pub mod venue;
pub mod worker;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{
    BridgeConfig, BridgeSettings, Credentials, PlatformRoute, RelayRoute, RoutingPolicy, Secret,
    VenueConfig,
};
pub use context::BridgeContext;
pub use error::{BridgeError, BridgeResult, FailureClass, PlatformError, RelayError};
pub use events::{BridgeEvent, BridgeStatus, ListenerStatus, QueueStats, SkipReason};
pub use ledger::{ProcessedLedger, SharedLedger};
pub use net::memory::{MemoryPlatform, MemoryRelay};
pub use net::{
    BroadcastReceipt, CommentOp, EventDraft, PlatformClient, PlatformPost, RelayEvent,
    RelayFilter, RelayTransport, SignedEvent, Subscription, SubscriptionMessage,
};
pub use queue::DirectionalQueue;
pub use rate::{GateDecision, RateGate, RateState};
pub use retry::RetryPolicy;
pub use supervisor::BridgeSupervisor;
pub use transform::{ContentTransform, MarkerSet};
pub use types::*;
pub use venue::{ContainerResolver, VenueContainer};
