//! Outbound composition: bodies, titles, slugs and metadata for each route.

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::markup::{clean_content, plain_text};
use super::marker::{METADATA_KEY, SOURCE_TAG};
use crate::config::{BridgeSettings, VERSION};
use crate::error::{BridgeError, BridgeResult};
use crate::net::EventDraft;
use crate::types::{ContentKind, QueueItem, KIND_ARTICLE, KIND_NOTE};

/// Title used when nothing better can be derived.
pub const FALLBACK_TITLE: &str = "Untitled Nostr Article";

/// Longest generated title, in characters.
pub const TITLE_CHARS: usize = 80;

/// Longest generated summary, in characters.
pub const SUMMARY_CHARS: usize = 150;

/// Truncation notice; the Hive link follows when it fits.
const READ_MORE: &str = "... read original post in full";

/// Content a truncated note keeps before it gives up footer or link.
const MIN_NOTE_HEAD: usize = 80;

const HIVE_FOOTER_HOME: &str = "https://github.com/crrdlx/hostr";
const NOSTR_FOOTER_HOME: &str = "https://hostr-home.vercel.app";

/// A relay note body and whether it had to be cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedNote {
    /// Final content, within the note budget
    pub text: String,
    /// Whether the "read more" suffix replaced the tail
    pub truncated: bool,
}

/// Formats bridge output for both directions.
#[derive(Debug, Clone)]
pub struct ContentTransform {
    longform_threshold: usize,
    note_budget: usize,
    nostr_link_base: String,
    hive_link_base: String,
    version: String,
}

impl ContentTransform {
    /// Build from settings, stamping the crate version into footers.
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            longform_threshold: settings.longform_threshold,
            note_budget: settings.note_budget,
            nostr_link_base: settings.nostr_link_base.trim_end_matches('/').to_string(),
            hive_link_base: settings.hive_link_base.trim_end_matches('/').to_string(),
            version: VERSION.to_string(),
        }
    }

    /// Override the version stamped into footers.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Relay budget in characters.
    pub fn note_budget(&self) -> usize {
        self.note_budget
    }

    /// Classify a relay event: articles are always long.
    pub fn classify_event(&self, kind: u16, content: &str) -> ContentKind {
        if kind == KIND_ARTICLE || content.chars().count() > self.longform_threshold {
            ContentKind::Long
        } else {
            ContentKind::Short
        }
    }

    /// Classify a Hive post: titled root posts are Hive's long-form kind.
    pub fn classify_post(&self, title: &str, body: &str) -> ContentKind {
        if !title.trim().is_empty() || plain_text(body).chars().count() > self.longform_threshold {
            ContentKind::Long
        } else {
            ContentKind::Short
        }
    }

    /// Canonical viewer link for a Nostr event.
    pub fn nostr_link(&self, event_id: &str) -> String {
        format!("{}/{}", self.nostr_link_base, event_id)
    }

    /// Canonical viewer link for a Hive post.
    pub fn hive_link(&self, author: &str, permlink: &str) -> String {
        format!("{}/@{}/{}", self.hive_link_base, author, permlink)
    }

    fn hive_footer(&self, route: &str) -> String {
        format!(
            "Auto cross-post via Hostr v{} ({}) at {}",
            self.version, route, HIVE_FOOTER_HOME
        )
    }

    fn nostr_footer(&self, route: &str) -> String {
        format!(
            "\n\nAuto cross-post via Hostr v{} ({}) at {}",
            self.version, route, NOSTR_FOOTER_HOME
        )
    }

    /// Snap body for a short Nostr note.
    pub fn snap_body(&self, item: &QueueItem) -> String {
        format!(
            "{}\n\nView the original post over on [Nostr]({})\n{}",
            item.content.trim_end(),
            self.nostr_link(&item.source_id),
            self.hive_footer("br")
        )
    }

    /// Top-level post body for a long Nostr note or article.
    pub fn longform_body(&self, item: &QueueItem) -> String {
        format!(
            "{}\n\n---\n\n*This article originated on [Nostr]({})*\n\n{}",
            item.content.trim_end(),
            self.nostr_link(&item.source_id),
            self.hive_footer("lf")
        )
    }

    /// Kind-1 note for a Hive post, cut to the note budget.
    ///
    /// Untruncated notes end with the origin line and footer; truncated
    /// ones end with the "read more" suffix and footer. When a long link
    /// leaves too little room, the footer goes first, then the link. The
    /// result is at most `note_budget` characters.
    pub fn note_content(&self, item: &QueueItem) -> BridgeResult<ComposedNote> {
        let plain = plain_text(&item.content);
        let link = self.hive_link(&item.author, &item.source_id);
        let footer = self.nostr_footer("br");

        let full = format!("{}\n\nOriginally posted on Hive at {}{}", plain, link, footer);
        if full.chars().count() <= self.note_budget {
            return Ok(ComposedNote {
                text: full,
                truncated: false,
            });
        }

        let linked = format!("{}:\n{}", READ_MORE, link);
        let endings = [
            (linked.as_str(), footer.as_str()),
            (linked.as_str(), ""),
            (READ_MORE, footer.as_str()),
        ];
        let (suffix, footer) = endings
            .into_iter()
            .find(|(suffix, footer)| {
                self.note_budget
                    .saturating_sub(suffix.chars().count() + footer.chars().count())
                    >= MIN_NOTE_HEAD
            })
            .unwrap_or((READ_MORE, ""));

        let reserved = suffix.chars().count() + footer.chars().count();
        if reserved >= self.note_budget {
            return Err(BridgeError::Transform(format!(
                "note budget {} cannot hold the {} character truncation notice",
                self.note_budget, reserved
            )));
        }
        let keep = self.note_budget - reserved;
        let head: String = plain.chars().take(keep).collect();
        Ok(ComposedNote {
            text: format!("{}{}{}", head.trim_end(), suffix, footer),
            truncated: true,
        })
    }

    /// Markdown body for a kind-30023 article mirroring a Hive post.
    pub fn article_content(&self, item: &QueueItem) -> String {
        format!(
            "{}\n\n---\n\nOriginally posted on Hive at {}{}",
            clean_content(&item.content),
            self.hive_link(&item.author, &item.source_id),
            self.nostr_footer("lf")
        )
    }

    /// Relay draft for a Hive post routed as a kind-1 note.
    pub fn note_draft(&self, item: &QueueItem, now: DateTime<Utc>) -> BridgeResult<EventDraft> {
        let note = self.note_content(item)?;
        Ok(EventDraft {
            kind: KIND_NOTE,
            content: note.text,
            tags: vec![
                vec!["t".to_string(), "hostr".to_string()],
                vec![SOURCE_TAG.to_string(), format!("hive:{}", source_hash(&item.source_id))],
            ],
            created_at: now,
        })
    }

    /// Relay draft for a Hive post routed as a kind-30023 article.
    pub fn article_draft(&self, item: &QueueItem, now: DateTime<Utc>) -> EventDraft {
        let title = item
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.chars().take(TITLE_CHARS).collect())
            .unwrap_or_else(|| generate_title(&item.content, &item.tags));
        EventDraft {
            kind: KIND_ARTICLE,
            content: self.article_content(item),
            tags: vec![
                vec!["d".to_string(), item.source_id.clone()],
                vec!["title".to_string(), title],
                vec!["summary".to_string(), summarize(&plain_text(&item.content), SUMMARY_CHARS)],
                vec!["published_at".to_string(), item.created_at.timestamp().to_string()],
                vec!["t".to_string(), "hostr".to_string()],
                vec![SOURCE_TAG.to_string(), format!("hive:{}", source_hash(&item.source_id))],
            ],
            created_at: now,
        }
    }
}

/// Title from an explicit `title` tag, else the first content line.
pub fn generate_title(content: &str, tags: &[Vec<String>]) -> String {
    let tagged = tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("title"))
        .and_then(|t| t.get(1))
        .map(|t| t.trim())
        .filter(|t| !t.is_empty());
    if let Some(title) = tagged {
        return title.chars().take(TITLE_CHARS).collect();
    }

    plain_text(content)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(TITLE_CHARS).collect::<String>().trim_end().to_string())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

/// First `max_chars` of `text` on one line, cut at a word boundary.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let head: String = flat.chars().take(max_chars).collect();
    let cut = match head.rfind(' ') {
        Some(idx) if idx > 0 => &head[..idx],
        _ => head.as_str(),
    };
    format!("{}…", cut.trim_end())
}

/// Short stable hash of a source id, carried in outbound metadata.
pub fn source_hash(source_id: &str) -> String {
    let digest = Sha256::digest(source_id.as_bytes());
    hex::encode(&digest[..8])
}

/// Fresh permlink for a snap.
pub fn snap_permlink() -> String {
    format!("hostr-snap-{}", ulid::Ulid::new().to_string().to_lowercase())
}

/// Fresh permlink for a top-level post.
pub fn longform_permlink() -> String {
    format!("hostr-longform-{}", ulid::Ulid::new().to_string().to_lowercase())
}

/// `json_metadata` for a bridged Hive write.
pub fn platform_metadata(kind: ContentKind, source_id: &str) -> String {
    let (tag, app) = match kind {
        ContentKind::Short => ("hostr-snap", "hostr-snaps/1.0"),
        ContentKind::Long => ("hostr-longform", "hostr-longform/1.0"),
    };
    json!({
        "tags": ["hostr", tag],
        "app": app,
        METADATA_KEY: {
            "source": "nostr",
            "source_hash": source_hash(source_id),
        },
    })
    .to_string()
}
