//! Network collaborators.
//!
//! The bridge talks to Nostr relays through [`RelayTransport`] and to a Hive
//! node through [`PlatformClient`]. Both are object-safe async traits so the
//! supervisor can hold them as `Arc<dyn ...>`; [`memory`] provides in-process
//! implementations used by tests and `hostr replay`.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Secret;
use crate::error::{PlatformError, RelayError};

/// A Nostr event as received from a relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    /// Event id (hex)
    pub id: String,
    /// Author public key (hex)
    pub pubkey: String,
    /// Event kind
    pub kind: u16,
    /// Body
    pub content: String,
    /// Tags, each a `[name, value, ...]` list
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Author-reported creation time
    pub created_at: DateTime<Utc>,
}

impl RelayEvent {
    /// Whether any tag has the given name.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.first().map(String::as_str) == Some(name))
    }
}

/// Subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFilter {
    /// Accepted kinds
    pub kinds: Vec<u16>,
    /// Accepted author pubkeys
    pub authors: Vec<String>,
    /// Lower bound on `created_at`, sent as Unix seconds
    pub since: DateTime<Utc>,
}

impl RelayFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &RelayEvent) -> bool {
        self.kinds.contains(&event.kind)
            && self.authors.iter().any(|a| a == &event.pubkey)
            && event.created_at.timestamp() >= self.since.timestamp()
    }
}

/// An unsigned event ready for the signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Event kind
    pub kind: u16,
    /// Body
    pub content: String,
    /// Tags
    pub tags: Vec<Vec<String>>,
    /// Creation time to stamp
    pub created_at: DateTime<Utc>,
}

/// A signed event ready to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEvent {
    /// The event with its computed id and author
    pub event: RelayEvent,
    /// Schnorr signature (hex)
    pub sig: String,
}

/// Messages delivered on an open subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    /// A matching event
    Event(RelayEvent),
    /// The relay finished sending stored events
    EndOfStored,
    /// The relay reported an error
    Error(String),
    /// The relay closed the subscription
    Closed,
}

/// An open subscription across a set of relays.
///
/// Dropping or closing it cancels the producer side.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<SubscriptionMessage>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wrap a message channel and the token that stops its producer.
    pub fn new(rx: mpsc::Receiver<SubscriptionMessage>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next message; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<SubscriptionMessage> {
        self.rx.recv().await
    }

    /// Stop the subscription.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Nostr relay access.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open a connection to one relay.
    async fn connect(&self, endpoint: &str) -> Result<(), RelayError>;

    /// Subscribe on the given (already connected) relays.
    async fn subscribe(
        &self,
        endpoints: &[String],
        filter: &RelayFilter,
    ) -> Result<Subscription, RelayError>;

    /// Sign a draft with the bridge's relay key.
    async fn sign(&self, draft: EventDraft, key: &Secret) -> Result<SignedEvent, RelayError>;

    /// Publish to one relay; `Ok` means the relay accepted it.
    async fn publish(&self, endpoint: &str, event: &SignedEvent) -> Result<(), RelayError>;
}

/// A Hive post or comment as returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPost {
    /// Author account
    pub author: String,
    /// Per-author slug
    pub permlink: String,
    /// Title (empty for comments)
    #[serde(default)]
    pub title: String,
    /// Markdown/HTML body
    #[serde(default)]
    pub body: String,
    /// Parent author; empty for top-level posts
    #[serde(default)]
    pub parent_author: String,
    /// Parent permlink, or the category tag for top-level posts
    #[serde(default)]
    pub parent_permlink: String,
    /// Node-reported creation time
    pub created: DateTime<Utc>,
    /// Raw `json_metadata` string
    #[serde(default)]
    pub json_metadata: String,
}

impl PlatformPost {
    /// Parsed `json_metadata`, if it is valid JSON.
    pub fn metadata(&self) -> Option<Value> {
        serde_json::from_str(&self.json_metadata).ok()
    }

    /// Metadata tags as `["t", tag]` pairs.
    pub fn metadata_tags(&self) -> Vec<Vec<String>> {
        self.metadata()
            .and_then(|m| m.get("tags").cloned())
            .and_then(|t| serde_json::from_value::<Vec<String>>(t).ok())
            .unwrap_or_default()
            .into_iter()
            .map(|tag| vec!["t".to_string(), tag])
            .collect()
    }

    /// Whether this is a top-level post rather than a comment.
    pub fn is_top_level(&self) -> bool {
        self.parent_author.is_empty()
    }
}

/// A Hive `comment` operation (posts are comments with an empty parent author).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentOp {
    /// Parent author; empty for top-level
    pub parent_author: String,
    /// Parent permlink, or category tag for top-level
    pub parent_permlink: String,
    /// Posting account
    pub author: String,
    /// New permlink
    pub permlink: String,
    /// Title
    pub title: String,
    /// Body
    pub body: String,
    /// Serialized metadata object
    pub json_metadata: String,
}

/// Acknowledgement of a broadcast write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    /// Transaction id
    pub id: String,
}

/// Hive node access.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Most recent blog posts tagged `tag`, newest first.
    async fn query_latest_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<PlatformPost>, PlatformError>;

    /// Most recent posts in `author`'s blog feed.
    async fn query_author_feed(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<PlatformPost>, PlatformError>;

    /// Sign and broadcast a comment operation.
    async fn broadcast_write(
        &self,
        op: &CommentOp,
        posting_key: &Secret,
    ) -> Result<BroadcastReceipt, PlatformError>;
}
