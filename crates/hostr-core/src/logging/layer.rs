//! `tracing` layer that mirrors events into the instance's JSONL file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::JsonLogEntry;
use super::writer::InstanceLogWriter;

pub struct JsonlLayer {
    writer: Arc<InstanceLogWriter>,
}

impl JsonlLayer {
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self::from_writer(Arc::new(InstanceLogWriter::new(logs_dir, instance)?)))
    }

    pub fn from_writer(writer: Arc<InstanceLogWriter>) -> Self {
        Self { writer }
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut entry = JsonLogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        )
        .with_fields(visitor.fields);

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                entry = entry.with_span(spans.join(" > "));
            }
        }

        self.writer.record(&entry);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.put(field, Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.put(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Map a `-v` count to a default filter directive.
pub fn verbosity_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber: console output on stderr plus an
/// optional JSONL file.
pub struct LoggingBuilder {
    instance: String,
    verbosity: u8,
    logs_dir: Option<PathBuf>,
}

impl LoggingBuilder {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            verbosity: 0,
            logs_dir: None,
        }
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn logs_dir(mut self, logs_dir: Option<PathBuf>) -> Self {
        self.logs_dir = logs_dir;
        self
    }

    /// `RUST_LOG` wins over the verbosity count when set.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity_filter(self.verbosity)))
    }

    /// Install the subscriber. Returns the JSONL path when file logging is
    /// on. A subscriber installed earlier is left in place.
    pub fn init(self) -> std::io::Result<Option<PathBuf>> {
        let jsonl = match &self.logs_dir {
            Some(dir) => Some(JsonlLayer::new(dir, &self.instance)?),
            None => None,
        };
        let path = jsonl.as_ref().map(|layer| layer.log_path().to_path_buf());

        let _ = tracing_subscriber::registry()
            .with(self.env_filter())
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(jsonl)
            .try_init();
        Ok(path)
    }
}
