//! Loop-prevention markers.
//!
//! Every outbound item carries at least one marker that [`MarkerSet::standard`]
//! recognizes, so the opposite listener drops it instead of echoing it back.
//! Older bridge releases used different wordings; all of them stay in the
//! standard set because their posts are still on both networks.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Nostr tag name carrying the source hash on bridged events.
pub const SOURCE_TAG: &str = "hostr-source";

/// Key of the bridge object inside Hive `json_metadata`.
pub const METADATA_KEY: &str = "hostr";

/// The parts of an item a marker may look at.
#[derive(Debug, Clone, Copy)]
pub struct MarkerSubject<'a> {
    /// Raw body text
    pub body: &'a str,
    /// Nostr tags, or Hive metadata tags
    pub tags: &'a [Vec<String>],
    /// Parsed Hive `json_metadata`, when present
    pub metadata: Option<&'a Value>,
}

impl<'a> MarkerSubject<'a> {
    /// A subject with only body text.
    pub fn text(body: &'a str) -> Self {
        Self {
            body,
            tags: &[],
            metadata: None,
        }
    }

    /// Attach tags.
    pub fn with_tags(mut self, tags: &'a [Vec<String>]) -> Self {
        self.tags = tags;
        self
    }

    /// Attach parsed metadata.
    pub fn with_metadata(mut self, metadata: Option<&'a Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A predicate that recognizes bridge-produced content.
pub trait LoopMarker: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Whether `subject` carries this marker.
    fn matches(&self, subject: &MarkerSubject<'_>) -> bool;
}

/// Marker recognized by a case-insensitive phrase in the body.
pub struct PhraseMarker {
    name: &'static str,
    pattern: &'static LazyLock<Regex>,
}

impl LoopMarker for PhraseMarker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, subject: &MarkerSubject<'_>) -> bool {
        self.pattern.is_match(subject.body)
    }
}

static FOOTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)auto\s*cross-post\s*(?:from\s*(?:hive|nostr)\s*)?via\s*hostr")
        .expect("valid footer pattern")
});

static NOSTR_ORIGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)view\s*the\s*original\s*(?:post|article)\s*over\s*on\s*\[?nostr\]?")
        .expect("valid nostr origin pattern")
});

static HIVE_ORIGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)originally\s*posted\s*on\s*hive\s*at\s*https://(?:peakd\.com|hive\.blog|hive\.com|ecency\.com)")
        .expect("valid hive origin pattern")
});

static ARTICLE_ORIGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)originated\s*on\s*\[?nostr\]?").expect("valid article origin pattern")
});

static TRUNCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)read\s*(?:full\s*note|original\s*post\s*in\s*full)")
        .expect("valid truncation pattern")
});

/// Marker recognized by bridge metadata rather than body text.
pub struct MetadataMarker;

impl LoopMarker for MetadataMarker {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn matches(&self, subject: &MarkerSubject<'_>) -> bool {
        let tagged = subject
            .tags
            .iter()
            .any(|t| t.first().map(String::as_str) == Some(SOURCE_TAG));
        if tagged {
            return true;
        }
        match subject.metadata {
            Some(meta) => {
                meta.get(METADATA_KEY).is_some()
                    || meta
                        .get("app")
                        .and_then(Value::as_str)
                        .is_some_and(|app| app.starts_with("hostr"))
            }
            None => false,
        }
    }
}

/// Ordered collection of loop markers.
pub struct MarkerSet {
    markers: Vec<Box<dyn LoopMarker>>,
}

impl MarkerSet {
    /// All markers current and past bridge releases emit.
    pub fn standard() -> Self {
        Self::empty()
            .with(PhraseMarker {
                name: "footer",
                pattern: &FOOTER,
            })
            .with(PhraseMarker {
                name: "nostr-origin",
                pattern: &NOSTR_ORIGIN,
            })
            .with(PhraseMarker {
                name: "hive-origin",
                pattern: &HIVE_ORIGIN,
            })
            .with(PhraseMarker {
                name: "article-origin",
                pattern: &ARTICLE_ORIGIN,
            })
            .with(PhraseMarker {
                name: "truncation",
                pattern: &TRUNCATION,
            })
            .with(MetadataMarker)
    }

    /// A set that recognizes nothing.
    pub fn empty() -> Self {
        Self {
            markers: Vec::new(),
        }
    }

    /// Append a marker.
    pub fn with(mut self, marker: impl LoopMarker + 'static) -> Self {
        self.markers.push(Box::new(marker));
        self
    }

    /// Name of the first marker that matches, if any.
    pub fn detect(&self, subject: &MarkerSubject<'_>) -> Option<&'static str> {
        self.markers
            .iter()
            .find(|m| m.matches(subject))
            .map(|m| m.name())
    }

    /// Whether the subject was produced by the bridge.
    pub fn is_bridged(&self, subject: &MarkerSubject<'_>) -> bool {
        self.detect(subject).is_some()
    }

    /// Names of all markers, in evaluation order.
    pub fn names(&self) -> Vec<&'static str> {
        self.markers.iter().map(|m| m.name()).collect()
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for MarkerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerSet")
            .field("markers", &self.names())
            .finish()
    }
}

/// First opt-out keyword found in `body`, matched case-insensitively.
pub fn opt_out_keyword<'k>(body: &str, keywords: &'k [String]) -> Option<&'k str> {
    let lower = body.to_lowercase();
    keywords
        .iter()
        .find(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        .map(String::as_str)
}
