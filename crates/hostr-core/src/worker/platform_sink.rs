use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Delivery, DeliveryOutcome};
use crate::config::{PlatformRoute, RoutingPolicy, Secret};
use crate::error::PlatformError;
use crate::net::{CommentOp, PlatformClient};
use crate::transform::{
    generate_title, longform_permlink, platform_metadata, snap_permlink, ContentTransform,
};
use crate::types::{Category, ContentKind, Direction, QueueItem};
use crate::venue::ContainerResolver;

/// Writes Nostr items to Hive as snaps or top-level posts.
pub struct PlatformSink {
    platform: Arc<dyn PlatformClient>,
    resolver: ContainerResolver,
    transform: ContentTransform,
    routing: RoutingPolicy,
    username: String,
    posting_key: Secret,
    longform_parent: String,
    container_retry: Duration,
    call_timeout: Duration,
}

impl PlatformSink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        resolver: ContainerResolver,
        transform: ContentTransform,
        routing: RoutingPolicy,
        username: String,
        posting_key: Secret,
        longform_parent: String,
        container_retry: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            resolver,
            transform,
            routing,
            username,
            posting_key,
            longform_parent,
            container_retry,
            call_timeout,
        }
    }

    /// Build the comment op for `item`, or `None` when no venue container
    /// is available yet.
    async fn compose(&mut self, item: &QueueItem) -> Option<CommentOp> {
        match self.routing.platform_route(item.kind) {
            PlatformRoute::Venue => {
                let container = self.resolver.resolve_current().await?;
                debug!(
                    venue = %container.venue,
                    container = %container.permlink,
                    "Posting under venue container"
                );
                Some(CommentOp {
                    parent_author: container.author,
                    parent_permlink: container.permlink,
                    author: self.username.clone(),
                    permlink: snap_permlink(),
                    title: String::new(),
                    body: self.transform.snap_body(item),
                    json_metadata: platform_metadata(ContentKind::Short, &item.source_id),
                })
            }
            PlatformRoute::TopLevel => Some(CommentOp {
                parent_author: String::new(),
                parent_permlink: self.longform_parent.clone(),
                author: self.username.clone(),
                permlink: longform_permlink(),
                title: generate_title(&item.content, &item.tags),
                body: self.transform.longform_body(item),
                json_metadata: platform_metadata(ContentKind::Long, &item.source_id),
            }),
        }
    }
}

#[async_trait]
impl Delivery for PlatformSink {
    fn direction(&self) -> Direction {
        Direction::ToPlatform
    }

    fn category(&self, item: &QueueItem) -> Category {
        match self.routing.platform_route(item.kind) {
            PlatformRoute::Venue => Category::Snap,
            PlatformRoute::TopLevel => Category::Longform,
        }
    }

    async fn deliver(&mut self, item: &QueueItem) -> DeliveryOutcome {
        let route = self.routing.platform_route(item.kind);
        let Some(op) = self.compose(item).await else {
            return DeliveryOutcome::Deferred {
                wait: self.container_retry,
                reason: "no venue container available".to_string(),
            };
        };

        let write = self.platform.broadcast_write(&op, &self.posting_key);
        let result = match tokio::time::timeout(self.call_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(self.call_timeout)),
        };

        match result {
            Ok(receipt) => {
                debug!(tx = %receipt.id, permlink = %op.permlink, "Broadcast accepted");
                if route == PlatformRoute::Venue {
                    self.resolver.advance();
                }
                DeliveryOutcome::Posted {
                    target: op.permlink,
                }
            }
            Err(e) => {
                let retry_after = match &e {
                    PlatformError::RateLimited { retry_after, .. } => *retry_after,
                    _ => None,
                };
                DeliveryOutcome::Failed {
                    class: e.class(),
                    message: e.to_string(),
                    retry_after,
                }
            }
        }
    }
}
