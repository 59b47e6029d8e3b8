//! One JSON object per log line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field hoisted out of `fields` so a whole direction can be filtered with
/// `jq 'select(.direction == "nostr->hive")'`.
pub const DIRECTION_FIELD: &str = "direction";

/// A single JSONL log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLogEntry {
    /// RFC 3339 timestamp with millisecond precision
    pub ts: String,

    pub level: String,

    /// Bridge instance, usually the Hive account being bridged
    pub instance: String,

    /// Module path of the emitting code
    pub target: String,

    pub msg: String,

    /// `nostr->hive` or `hive->nostr` when the event carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Span names from root to leaf, joined with `" > "`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl JsonLogEntry {
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            direction: None,
            fields: None,
            span: None,
        }
    }

    /// Attach structured fields, lifting `direction` to the top level.
    pub fn with_fields(mut self, mut fields: Map<String, Value>) -> Self {
        if let Some(Value::String(direction)) = fields.remove(DIRECTION_FIELD) {
            self.direction = Some(direction);
        }
        if !fields.is_empty() {
            self.fields = Some(Value::Object(fields));
        }
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Look up a structured field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref()?.get(name)
    }
}
