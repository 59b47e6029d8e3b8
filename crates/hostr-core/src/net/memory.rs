//! In-process relay and platform collaborators.
//!
//! Both record every write and can be scripted to fail, which is enough to
//! drive the whole bridge without a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    BroadcastReceipt, CommentOp, EventDraft, PlatformClient, PlatformPost, RelayEvent,
    RelayFilter, RelayTransport, SignedEvent, Subscription, SubscriptionMessage,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Secret;
use crate::error::{PlatformError, RelayError};

const SUBSCRIPTION_BUFFER: usize = 256;

struct LiveSubscription {
    filter: RelayFilter,
    tx: mpsc::Sender<SubscriptionMessage>,
    cancel: CancellationToken,
}

impl LiveSubscription {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct RelayState {
    unreachable: HashSet<String>,
    refusals: HashMap<String, String>,
    subscribe_failures: VecDeque<String>,
    stored: Vec<RelayEvent>,
    live: Vec<LiveSubscription>,
    published: Vec<(String, SignedEvent)>,
    connects: usize,
    subscriptions: usize,
}

/// A relay pool held in memory.
///
/// Published events are stored and fanned out to live subscriptions, so a
/// bridge running against it sees its own writes come back.
#[derive(Clone)]
pub struct MemoryRelay {
    pubkey: String,
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    /// A pool whose signer produces events authored by `pubkey`.
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            state: Arc::new(Mutex::new(RelayState::default())),
        }
    }

    /// Make `endpoint` refuse connections and publishes.
    pub fn set_unreachable(&self, endpoint: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(endpoint.to_string());
        } else {
            state.unreachable.remove(endpoint);
        }
    }

    /// Make `endpoint` answer publishes with a negative OK.
    pub fn refuse_publishes(&self, endpoint: &str, reason: &str) {
        self.state
            .lock()
            .refusals
            .insert(endpoint.to_string(), reason.to_string());
    }

    /// Fail the next `subscribe` call with `reason`.
    pub fn fail_next_subscribe(&self, reason: &str) {
        self.state
            .lock()
            .subscribe_failures
            .push_back(reason.to_string());
    }

    /// Store an event and deliver it to matching live subscriptions.
    pub fn inject(&self, event: RelayEvent) {
        let mut state = self.state.lock();
        state.live.retain(LiveSubscription::is_live);
        for sub in &state.live {
            if sub.filter.matches(&event) {
                let _ = sub.tx.try_send(SubscriptionMessage::Event(event.clone()));
            }
        }
        state.stored.push(event);
    }

    /// Send a relay error notice to every live subscription.
    pub fn inject_error(&self, message: &str) {
        let mut state = self.state.lock();
        state.live.retain(LiveSubscription::is_live);
        for sub in &state.live {
            let _ = sub
                .tx
                .try_send(SubscriptionMessage::Error(message.to_string()));
        }
    }

    /// Every accepted publish as `(endpoint, event)`.
    pub fn published(&self) -> Vec<(String, SignedEvent)> {
        self.state.lock().published.clone()
    }

    /// Distinct published events, in first-publish order.
    pub fn published_events(&self) -> Vec<SignedEvent> {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        state
            .published
            .iter()
            .filter(|(_, ev)| seen.insert(ev.event.id.clone()))
            .map(|(_, ev)| ev.clone())
            .collect()
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of successful `subscribe` calls.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// Subscriptions that are still open.
    pub fn live_subscriptions(&self) -> usize {
        let mut state = self.state.lock();
        state.live.retain(LiveSubscription::is_live);
        state.live.len()
    }
}

/// NIP-01 event id: sha256 over the canonical serialization.
fn event_id(pubkey: &str, draft: &EventDraft) -> String {
    let canonical = serde_json::json!([
        0,
        pubkey,
        draft.created_at.timestamp(),
        draft.kind,
        draft.tags,
        draft.content
    ]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn connect(&self, endpoint: &str) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        if state.unreachable.contains(endpoint) {
            return Err(RelayError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        Ok(())
    }

    async fn subscribe(
        &self,
        endpoints: &[String],
        filter: &RelayFilter,
    ) -> Result<Subscription, RelayError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.subscribe_failures.pop_front() {
            return Err(RelayError::Subscribe(reason));
        }
        if endpoints.iter().all(|e| state.unreachable.contains(e)) {
            return Err(RelayError::Subscribe("no reachable relays".to_string()));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        for event in state.stored.iter().filter(|e| filter.matches(e)) {
            let _ = tx.try_send(SubscriptionMessage::Event(event.clone()));
        }
        let _ = tx.try_send(SubscriptionMessage::EndOfStored);

        state.live.retain(LiveSubscription::is_live);
        state.live.push(LiveSubscription {
            filter: filter.clone(),
            tx,
            cancel: cancel.clone(),
        });
        state.subscriptions += 1;
        Ok(Subscription::new(rx, cancel))
    }

    async fn sign(&self, draft: EventDraft, key: &Secret) -> Result<SignedEvent, RelayError> {
        if key.expose().is_empty() {
            return Err(RelayError::Signing("empty private key".to_string()));
        }
        let id = event_id(&self.pubkey, &draft);
        let sig = hex::encode(Sha256::digest(format!("{}{}", key.expose(), id).as_bytes()));
        Ok(SignedEvent {
            event: RelayEvent {
                id,
                pubkey: self.pubkey.clone(),
                kind: draft.kind,
                content: draft.content,
                tags: draft.tags,
                created_at: draft.created_at,
            },
            sig,
        })
    }

    async fn publish(&self, endpoint: &str, event: &SignedEvent) -> Result<(), RelayError> {
        {
            let mut state = self.state.lock();
            if state.unreachable.contains(endpoint) {
                return Err(RelayError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            if let Some(reason) = state.refusals.get(endpoint) {
                return Err(RelayError::Refused {
                    endpoint: endpoint.to_string(),
                    reason: reason.clone(),
                });
            }
            let first_copy = !state
                .published
                .iter()
                .any(|(_, ev)| ev.event.id == event.event.id);
            state.published.push((endpoint.to_string(), event.clone()));
            if !first_copy {
                return Ok(());
            }
        }
        self.inject(event.event.clone());
        Ok(())
    }
}

struct PlatformState {
    posts: Vec<PlatformPost>,
    writes: Vec<CommentOp>,
    write_instants: Vec<tokio::time::Instant>,
    write_failures: VecDeque<PlatformError>,
    query_failures: VecDeque<PlatformError>,
    min_spacing: Option<Duration>,
    queries: usize,
}

/// A Hive node held in memory.
///
/// Successful writes become posts visible to later feed queries.
#[derive(Clone)]
pub struct MemoryPlatform {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<PlatformState>>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// An empty node on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// An empty node stamping new posts with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(PlatformState {
                posts: Vec::new(),
                writes: Vec::new(),
                write_instants: Vec::new(),
                write_failures: VecDeque::new(),
                query_failures: VecDeque::new(),
                min_spacing: None,
                queries: 0,
            })),
        }
    }

    /// Reject writes closer together than `spacing`, like a real node does
    /// for root posts.
    pub fn enforce_spacing(&self, spacing: Duration) {
        self.state.lock().min_spacing = Some(spacing);
    }

    /// Seed a post.
    pub fn add_post(&self, post: PlatformPost) {
        self.state.lock().posts.push(post);
    }

    /// Fail the next broadcast with `err`.
    pub fn fail_next_write(&self, err: PlatformError) {
        self.state.lock().write_failures.push_back(err);
    }

    /// Fail the next query with `err`.
    pub fn fail_next_query(&self, err: PlatformError) {
        self.state.lock().query_failures.push_back(err);
    }

    /// Accepted writes, in order.
    pub fn writes(&self) -> Vec<CommentOp> {
        self.state.lock().writes.clone()
    }

    /// Runtime instants of accepted writes.
    pub fn write_instants(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().write_instants.clone()
    }

    /// Number of feed/tag queries served or failed.
    pub fn query_count(&self) -> usize {
        self.state.lock().queries
    }

    fn take_query_failure(&self) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.queries += 1;
        match state.query_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn newest_first(mut posts: Vec<PlatformPost>, limit: usize) -> Vec<PlatformPost> {
    posts.sort_by(|a, b| b.created.cmp(&a.created));
    posts.truncate(limit);
    posts
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    async fn query_latest_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<PlatformPost>, PlatformError> {
        self.take_query_failure()?;
        let state = self.state.lock();
        let matching = state
            .posts
            .iter()
            .filter(|p| p.is_top_level())
            .filter(|p| {
                p.parent_permlink == tag
                    || p.metadata_tags().iter().any(|t| t.get(1).map(String::as_str) == Some(tag))
            })
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn query_author_feed(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<PlatformPost>, PlatformError> {
        self.take_query_failure()?;
        let state = self.state.lock();
        let matching = state
            .posts
            .iter()
            .filter(|p| p.author == author)
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn broadcast_write(
        &self,
        op: &CommentOp,
        posting_key: &Secret,
    ) -> Result<BroadcastReceipt, PlatformError> {
        let mut state = self.state.lock();
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        if posting_key.expose().is_empty() {
            return Err(PlatformError::Rejected(
                "missing required posting authority".to_string(),
            ));
        }
        let now = tokio::time::Instant::now();
        if let (Some(spacing), Some(last)) = (state.min_spacing, state.write_instants.last()) {
            if now.duration_since(*last) < spacing {
                return Err(PlatformError::RateLimited {
                    message: "You may only post once every 5 minutes.".to_string(),
                    retry_after: Some(spacing - now.duration_since(*last)),
                });
            }
        }
        if state
            .posts
            .iter()
            .any(|p| p.author == op.author && p.permlink == op.permlink)
        {
            return Err(PlatformError::Rejected(format!(
                "permlink {} already exists",
                op.permlink
            )));
        }

        state.writes.push(op.clone());
        state.write_instants.push(now);
        state.posts.push(PlatformPost {
            author: op.author.clone(),
            permlink: op.permlink.clone(),
            title: op.title.clone(),
            body: op.body.clone(),
            parent_author: op.parent_author.clone(),
            parent_permlink: op.parent_permlink.clone(),
            created: self.clock.now(),
            json_metadata: op.json_metadata.clone(),
        });
        Ok(BroadcastReceipt {
            id: format!("tx-{}", state.writes.len()),
        })
    }
}
