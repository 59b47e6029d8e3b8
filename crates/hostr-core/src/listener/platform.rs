use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{hand_off, report_skip, set_status, sleep_or_cancel};
use crate::context::BridgeContext;
use crate::error::{BridgeResult, PlatformError};
use crate::events::{ListenerStatus, SkipReason};
use crate::net::PlatformPost;
use crate::transform::{opt_out_keyword, MarkerSubject};
use crate::types::{format_age, Direction, QueueItem};

const DIRECTION: Direction = Direction::ToRelay;

/// Polls the bridged Hive account's blog feed.
pub struct PlatformPoller {
    ctx: Arc<BridgeContext>,
    tx: mpsc::Sender<QueueItem>,
}

impl PlatformPoller {
    pub fn new(ctx: Arc<BridgeContext>, tx: mpsc::Sender<QueueItem>) -> Self {
        Self { ctx, tx }
    }

    /// Decide whether `post` should be mirrored.
    pub fn evaluate(&self, post: &PlatformPost) -> Result<QueueItem, SkipReason> {
        let settings = &self.ctx.config.settings;
        let username = &self.ctx.config.credentials.hive_username;
        let now = self.ctx.clock.now();

        if &post.author != username {
            return Err(SkipReason::NotAuthor);
        }
        if !post.is_top_level() {
            return Err(SkipReason::Comment);
        }
        if post.body.trim().is_empty() {
            return Err(SkipReason::EmptyBody);
        }

        let metadata = post.metadata();
        let tags = post.metadata_tags();
        let subject = MarkerSubject::text(&post.body)
            .with_tags(&tags)
            .with_metadata(metadata.as_ref());
        if let Some(marker) = self.ctx.markers.detect(&subject) {
            return Err(SkipReason::LoopMarker(marker));
        }
        if let Some(keyword) = opt_out_keyword(&post.body, &settings.do_not_bridge) {
            return Err(SkipReason::OptOut(keyword.to_string()));
        }

        let age = now - post.created;
        if age.num_seconds() >= settings.platform_recency_secs as i64 {
            return Err(SkipReason::TooOld {
                age_secs: age.num_seconds(),
            });
        }
        if self.ctx.to_relay_ledger.lock().has(&post.permlink) {
            return Err(SkipReason::AlreadyProcessed);
        }

        let title = post.title.trim();
        Ok(QueueItem {
            source_id: post.permlink.clone(),
            content: post.body.clone(),
            kind: self.ctx.transform.classify_post(title, &post.body),
            tags,
            title: (!title.is_empty()).then(|| title.to_string()),
            author: post.author.clone(),
            created_at: post.created,
            enqueued_at: now,
            attempts: 0,
        })
    }

    /// Fetch the feed once and hand eligible posts over, oldest first.
    ///
    /// A failed query is logged and otherwise ignored.
    pub async fn poll_once(&self) -> BridgeResult<()> {
        let settings = &self.ctx.config.settings;
        let username = &self.ctx.config.credentials.hive_username;
        let query = self.ctx.platform.query_author_feed(username, settings.poll_limit);
        let result = match tokio::time::timeout(settings.call_timeout(), query).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(settings.call_timeout())),
        };

        let mut posts = match result {
            Ok(posts) => posts,
            Err(e) => {
                warn!(account = %username, error = %e, "Feed query failed");
                return Ok(());
            }
        };
        posts.sort_by(|a, b| a.created.cmp(&b.created));

        let now = self.ctx.clock.now();
        for post in posts {
            match self.evaluate(&post) {
                Ok(item) => {
                    info!(
                        permlink = %post.permlink,
                        age = %format_age(now - post.created),
                        "New post found"
                    );
                    hand_off(&self.ctx, &self.tx, DIRECTION, item).await?;
                }
                Err(reason) => report_skip(&self.ctx, DIRECTION, &post.permlink, reason),
            }
        }
        Ok(())
    }

    /// Poll immediately, then every poll interval, until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> BridgeResult<()> {
        let interval = self.ctx.config.settings.poll_interval();
        info!(
            account = %self.ctx.config.credentials.hive_username,
            interval_secs = interval.as_secs(),
            "Starting Hive poller"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            set_status(&self.ctx, DIRECTION, ListenerStatus::Polling);
            self.poll_once().await?;
            self.ctx.status.write().polls += 1;
            if sleep_or_cancel(interval, &cancel).await {
                return Ok(());
            }
        }
    }
}
