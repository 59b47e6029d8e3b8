//! Console and JSONL logging.
//!
//! Every bridge component logs through `tracing` with structured fields.
//! With a log directory configured, each event is also appended as one JSON
//! object per line:
//!
//! ```text
//! logs/
//! └── raw/                               # one file per instance per day
//!     ├── 2026-10-19_alice.jsonl
//!     └── 2026-10-20_alice.jsonl
//! ```
//!
//! The `direction` field is lifted to the top level of each entry:
//!
//! ```bash
//! jq 'select(.direction == "nostr->hive" and .level == "error")' logs/raw/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{verbosity_filter, JsonlLayer, LoggingBuilder};
pub use writer::{read_direction, read_entries, InstanceLogWriter};
