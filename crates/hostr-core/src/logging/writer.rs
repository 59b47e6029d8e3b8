//! Append-only JSONL file per bridge instance per day.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use super::entry::JsonLogEntry;

/// Appends entries to `<logs_dir>/raw/<date>_<instance>.jsonl`.
pub struct InstanceLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    failures: AtomicU64,
}

impl InstanceLogWriter {
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let instance = instance.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        Self::at_path(raw_dir.join(format!("{}_{}.jsonl", date, instance)), instance)
    }

    /// Append to an explicit file instead of the dated one.
    pub fn at_path(path: impl Into<PathBuf>, instance: impl Into<String>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            instance: instance.into(),
            writer: Mutex::new(BufWriter::new(file)),
            path,
            failures: AtomicU64::new(0),
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry as a single line and flush.
    pub fn write(&self, entry: &JsonLogEntry) -> std::io::Result<()> {
        let line = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    /// Write `entry`, counting failures. The first one is reported on
    /// stderr since the log file itself is what broke.
    pub fn record(&self, entry: &JsonLogEntry) {
        if let Err(e) = self.write(entry) {
            if self.failures.fetch_add(1, Ordering::Relaxed) == 0 {
                eprintln!("Warning: Failed to write log entry to {:?}: {}", self.path, e);
            }
        }
    }

    /// Entries lost to write errors so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every entry under `<logs_dir>/raw`, sorted by timestamp.
///
/// Unparseable lines are skipped.
pub fn read_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<JsonLogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().map(|ext| ext != "jsonl").unwrap_or(true) {
            continue;
        }
        for line in fs::read_to_string(&path)?.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match JsonLogEntry::from_json_line(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping malformed log line"),
            }
        }
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

/// Entries logged for one bridge direction.
pub fn read_direction(
    logs_dir: impl AsRef<Path>,
    direction: &str,
) -> std::io::Result<Vec<JsonLogEntry>> {
    Ok(read_entries(logs_dir)?
        .into_iter()
        .filter(|entry| entry.direction.as_deref() == Some(direction))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn fields(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_writer_creates_raw_dir() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let writer = InstanceLogWriter::new(&logs_dir, "alice").unwrap();

        assert!(logs_dir.join("raw").is_dir());
        assert!(writer.path().exists());
        assert!(writer.path().to_string_lossy().ends_with("_alice.jsonl"));
    }

    #[test]
    fn test_entries_append_and_read_back() {
        let temp = TempDir::new().unwrap();
        let writer = InstanceLogWriter::new(temp.path(), "alice").unwrap();

        writer
            .write(&JsonLogEntry::new("info", "alice", "a", "first"))
            .unwrap();
        writer
            .write(&JsonLogEntry::new("warn", "alice", "a", "second"))
            .unwrap();
        std::fs::write(temp.path().join("raw").join("notes.txt"), "ignored").unwrap();

        let entries = read_entries(temp.path()).unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.msg.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let writer = InstanceLogWriter::new(temp.path(), "alice").unwrap();
        writer
            .write(&JsonLogEntry::new("info", "alice", "a", "good"))
            .unwrap();
        drop(writer);

        let path = std::fs::read_dir(temp.path().join("raw"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        assert_eq!(read_entries(temp.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_read_direction_filters() {
        let temp = TempDir::new().unwrap();
        let writer = InstanceLogWriter::new(temp.path(), "alice").unwrap();
        let to_hive = JsonLogEntry::new("info", "alice", "w", "Posting")
            .with_fields(fields(json!({ "direction": "nostr->hive" })));
        let to_nostr = JsonLogEntry::new("info", "alice", "w", "Posting")
            .with_fields(fields(json!({ "direction": "hive->nostr" })));
        writer.write(&to_hive).unwrap();
        writer.write(&to_nostr).unwrap();
        writer
            .write(&JsonLogEntry::new("info", "alice", "s", "Heartbeat"))
            .unwrap();

        assert_eq!(read_direction(temp.path(), "nostr->hive").unwrap().len(), 1);
        assert_eq!(read_direction(temp.path(), "hive->nostr").unwrap().len(), 1);
        assert!(read_entries(temp.path()).unwrap().len() == 3);
    }

    #[test]
    fn test_missing_dir_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_entries(temp.path().join("nope")).unwrap().is_empty());
    }
}
