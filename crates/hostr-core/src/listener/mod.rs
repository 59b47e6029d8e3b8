//! Source listeners.
//!
//! [`RelayListener`] holds a live Nostr subscription and feeds the Hive-bound
//! queue; [`PlatformPoller`] polls the Hive blog feed and feeds the
//! relay-bound queue. Both only decide eligibility and hand items over; the
//! workers own the queues.

mod platform;
mod relay;

pub use platform::PlatformPoller;
pub use relay::RelayListener;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{emit, BridgeEvent, ListenerStatus, SkipReason};
use crate::types::{Direction, QueueItem};

/// Sleep for `duration` unless `cancel` fires first. Returns `true` if
/// cancelled.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Send an eligible item to the worker of `direction`.
pub(crate) async fn hand_off(
    ctx: &BridgeContext,
    tx: &mpsc::Sender<QueueItem>,
    direction: Direction,
    item: QueueItem,
) -> BridgeResult<()> {
    let id = item.source_id.clone();
    info!(
        direction = direction.label(),
        id = %id,
        kind = %item.kind,
        preview = %item.preview(),
        "Queued for cross-posting"
    );
    ctx.status.write().queue_mut(direction).accepted += 1;
    if tx.send(item).await.is_err() {
        ctx.status.write().queue_mut(direction).accepted -= 1;
        return Err(BridgeError::QueueClosed(direction.label().to_string()));
    }
    emit(&ctx.events, BridgeEvent::Enqueued { direction, id });
    Ok(())
}

/// Log and publish a skip decision.
pub(crate) fn report_skip(ctx: &BridgeContext, direction: Direction, id: &str, reason: SkipReason) {
    debug!(direction = direction.label(), id = %id, %reason, "Skipping");
    emit(
        &ctx.events,
        BridgeEvent::Skipped {
            direction,
            id: id.to_string(),
            reason,
        },
    );
}

/// Record and publish a listener state change.
pub(crate) fn set_status(ctx: &BridgeContext, direction: Direction, status: ListenerStatus) {
    {
        let mut board = ctx.status.write();
        match direction {
            Direction::ToPlatform => board.relay_listener = status.clone(),
            Direction::ToRelay => board.platform_listener = status.clone(),
        }
    }
    emit(&ctx.events, BridgeEvent::ListenerStatus { direction, status });
}
