//! Core data types shared by listeners, queues and workers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nostr kind for a short text note.
pub const KIND_NOTE: u16 = 1;

/// Nostr kind for a long-form article.
pub const KIND_ARTICLE: u16 = 30023;

/// Which way an item travels through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Nostr event mirrored onto Hive (the write-constrained side)
    ToPlatform,
    /// Hive post mirrored onto Nostr relays
    ToRelay,
}

impl Direction {
    /// Short label used in log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ToPlatform => "nostr->hive",
            Direction::ToRelay => "hive->nostr",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToPlatform => write!(f, "Nostr→Hive"),
            Direction::ToRelay => write!(f, "Hive→Nostr"),
        }
    }
}

/// Length class of a source item, which decides routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Fits a snap / short note
    Short,
    /// Article-sized, or a native long-form item
    Long,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Short => write!(f, "short"),
            ContentKind::Long => write!(f, "long"),
        }
    }
}

/// Write category tracked by a rate gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Short-form comment nested under a venue container
    Snap,
    /// Top-level platform post
    Longform,
    /// Relay note or article
    Note,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Snap => write!(f, "snap"),
            Category::Longform => write!(f, "longform"),
            Category::Note => write!(f, "note"),
        }
    }
}

/// An item waiting in a directional queue.
///
/// Owned by exactly one queue from enqueue until it is posted, rejected,
/// or put back at the head after a transient failure.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    /// Native identifier on the source network (event id or permlink)
    pub source_id: String,
    /// Raw source body
    pub content: String,
    /// Routing class
    pub kind: ContentKind,
    /// Source tags (Nostr tags, or Hive metadata tags as `["t", tag]`)
    pub tags: Vec<Vec<String>>,
    /// Source title, when the source network has one
    pub title: Option<String>,
    /// Source author account or pubkey
    pub author: String,
    /// Creation time reported by the source network
    pub created_at: DateTime<Utc>,
    /// When the listener handed the item to the queue
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub attempts: u32,
}

impl QueueItem {
    /// First 30 characters of the content, for log lines.
    pub fn preview(&self) -> String {
        preview(&self.content)
    }

    /// Value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// Truncate text to a short single-line preview for logs.
pub fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .take(30)
        .collect();
    if text.chars().count() > 30 {
        format!("{}...", flat)
    } else {
        flat
    }
}

/// Format an age as `XmYs` the way the bridge logs it.
pub fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    format!("{}m{}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        let text = "a".repeat(40);
        assert_eq!(preview(&text), format!("{}...", "a".repeat(30)));
        assert_eq!(preview("hello\nworld"), "hello world");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(chrono::Duration::seconds(125)), "2m5s");
        assert_eq!(format_age(chrono::Duration::seconds(-3)), "0m0s");
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::ToPlatform.to_string(), "Nostr→Hive");
        assert_eq!(Direction::ToRelay.label(), "hive->nostr");
    }
}
