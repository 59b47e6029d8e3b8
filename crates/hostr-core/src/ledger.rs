//! Processed-item ledgers.
//!
//! One ledger per direction records every source id that was mirrored or
//! permanently rejected. A hit means "never mirror again". Entries expire
//! after the retention window and the whole ledger is rewritten atomically
//! (temp file in the same directory, then rename) on every mutation.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BridgeError, BridgeResult};

/// Ledger of Nostr event ids mirrored onto Hive.
pub const TO_PLATFORM_LEDGER_FILE: &str = "processed_nostr_events.json";

/// Ledger of Hive permlinks mirrored onto Nostr.
pub const TO_RELAY_LEDGER_FILE: &str = "processed_permlinks.json";

/// A ledger shared between a listener and its worker.
pub type SharedLedger = Arc<Mutex<ProcessedLedger>>;

/// On-disk entry. Older files hold bare ids without a timestamp.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Stamped(String, i64),
    Bare(String),
}

#[derive(Serialize)]
struct StampedRef<'a>(&'a str, i64);

/// Set of processed source ids with first-seen timestamps.
#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    entries: HashMap<String, DateTime<Utc>>,
}

impl ProcessedLedger {
    /// An empty ledger that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: HashMap::new(),
        }
    }

    /// Load from `path`; a missing file is an empty ledger.
    ///
    /// Bare legacy ids are stamped with `now`. A file that exists but does
    /// not parse is an error.
    pub fn load_from_disk(path: impl Into<PathBuf>, now: DateTime<Utc>) -> BridgeResult<Self> {
        let path = path.into();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger file, starting empty");
                return Ok(Self::new(path));
            }
            Err(source) => {
                return Err(BridgeError::Persistence {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let stored: Vec<StoredEntry> =
            serde_json::from_str(&raw).map_err(|e| BridgeError::CorruptState {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut entries = HashMap::with_capacity(stored.len());
        for entry in stored {
            let (id, seen) = match entry {
                StoredEntry::Stamped(id, ms) => {
                    (id, Utc.timestamp_millis_opt(ms).single().unwrap_or(now))
                }
                StoredEntry::Bare(id) => (id, now),
            };
            entries.insert(id, seen);
        }

        info!(path = %path.display(), entries = entries.len(), "Loaded ledger");
        Ok(Self { path, entries })
    }

    /// Whether `id` was already processed.
    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Record `id` and persist. Returns `false` if it was already present.
    ///
    /// On a persistence failure the in-memory mark is kept and the error is
    /// returned.
    pub fn mark_processed(&mut self, id: &str, now: DateTime<Utc>) -> BridgeResult<bool> {
        if self.entries.contains_key(id) {
            return Ok(false);
        }
        self.entries.insert(id.to_string(), now);
        self.persist()?;
        Ok(true)
    }

    /// Drop entries first seen before `now - retention`. Returns how many.
    pub fn prune_expired(
        &mut self,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> BridgeResult<usize> {
        let horizon = now - retention;
        let before = self.entries.len();
        self.entries.retain(|_, seen| *seen >= horizon);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Atomically rewrite the ledger file.
    pub fn persist(&self) -> BridgeResult<()> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        let stored: Vec<StampedRef<'_>> = sorted
            .into_iter()
            .map(|(id, seen)| StampedRef(id, seen.timestamp_millis()))
            .collect();
        let json = serde_json::to_vec_pretty(&stored)?;
        write_atomic(&self.path, &json)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry seen longest ago.
    pub fn oldest(&self) -> Option<(&str, DateTime<Utc>)> {
        self.entries
            .iter()
            .min_by_key(|(_, seen)| **seen)
            .map(|(id, seen)| (id.as_str(), *seen))
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write `bytes` to `path` through a synced temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> BridgeResult<()> {
    let persistence = |source: std::io::Error| BridgeError::Persistence {
        path: path.display().to_string(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(persistence)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persistence)?;
    tmp.write_all(bytes).map_err(persistence)?;
    tmp.as_file().sync_all().map_err(persistence)?;
    tmp.persist(path).map_err(|e| persistence(e.error))?;
    Ok(())
}
