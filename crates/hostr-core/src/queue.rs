//! FIFO of pending items for one direction.
//!
//! Owned by that direction's worker. Ids are deduplicated against
//! everything currently queued, so a listener that sees the same item twice
//! before the worker drains it enqueues it once.

use std::collections::{HashSet, VecDeque};

use tokio::time::Instant;

use crate::types::QueueItem;

/// Pending items plus the earliest instant the head may be attempted.
#[derive(Debug, Default)]
pub struct DirectionalQueue {
    items: VecDeque<QueueItem>,
    ids: HashSet<String>,
    not_before: Option<Instant>,
}

impl DirectionalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns `false` if the id is already queued.
    pub fn push_back(&mut self, item: QueueItem) -> bool {
        if !self.ids.insert(item.source_id.clone()) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Put an item back at the head after a failed or deferred attempt.
    pub fn push_front(&mut self, item: QueueItem) -> bool {
        if !self.ids.insert(item.source_id.clone()) {
            return false;
        }
        self.items.push_front(item);
        true
    }

    /// Take the head.
    pub fn pop_front(&mut self) -> Option<QueueItem> {
        let item = self.items.pop_front()?;
        self.ids.remove(&item.source_id);
        Some(item)
    }

    /// The head, without taking it.
    pub fn front(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Whether `id` is queued.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hold the head until `at`.
    pub fn defer_until(&mut self, at: Instant) {
        self.not_before = Some(at);
    }

    /// Earliest instant the head may be attempted, if deferred.
    pub fn not_before(&self) -> Option<Instant> {
        self.not_before
    }

    /// Whether the head may be attempted at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        !self.items.is_empty() && self.not_before.map_or(true, |t| now >= t)
    }

    /// Drop any deferral.
    pub fn clear_deferral(&mut self) {
        self.not_before = None;
    }

    /// Queued ids, head first.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.source_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;
    use chrono::Utc;
    use std::time::Duration;

    fn item(id: &str) -> QueueItem {
        QueueItem {
            source_id: id.into(),
            content: format!("content {}", id),
            kind: ContentKind::Short,
            tags: vec![],
            title: None,
            author: "alice".into(),
            created_at: Utc::now(),
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut q = DirectionalQueue::new();
        for id in ["e1", "e2", "e3"] {
            assert!(q.push_back(item(id)));
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop_front())
            .map(|i| i.source_id)
            .collect();
        assert_eq!(order, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut q = DirectionalQueue::new();
        assert!(q.push_back(item("abc")));
        assert!(!q.push_back(item("abc")));
        assert_eq!(q.len(), 1);

        let head = q.pop_front().unwrap();
        assert!(!q.contains("abc"));
        assert!(q.push_front(head));
        assert!(!q.push_front(item("abc")));
    }

    #[test]
    fn test_requeue_goes_to_head() {
        let mut q = DirectionalQueue::new();
        q.push_back(item("a"));
        q.push_back(item("b"));
        let a = q.pop_front().unwrap();
        q.push_front(a);
        assert_eq!(q.ids(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferral() {
        let mut q = DirectionalQueue::new();
        let now = Instant::now();
        assert!(!q.is_ready(now));
        q.push_back(item("a"));
        q.defer_until(now + Duration::from_secs(120));
        assert!(!q.is_ready(now));
        assert!(q.is_ready(now + Duration::from_secs(120)));
        q.clear_deferral();
        assert!(q.is_ready(now));
    }
}
