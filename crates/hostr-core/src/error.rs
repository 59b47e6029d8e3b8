//! Error types for the Hostr bridge

use std::time::Duration;

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A required environment variable is missing or empty
    #[error("Missing required environment variable: {0}")]
    MissingCredential(&'static str),

    /// Settings failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Ledger or rate state persistence failed
    #[error("Persistence error for {path}: {source}")]
    Persistence {
        /// File that could not be written or read
        path: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A persisted state file exists but could not be parsed
    #[error("Corrupt state file {path}: {reason}")]
    CorruptState {
        /// File that failed to parse
        path: String,
        /// Parser message
        reason: String,
    },

    /// Outbound content could not be composed
    #[error("Transform error: {0}")]
    Transform(String),

    /// Relay collaborator failure
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Platform collaborator failure
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// A listener's downstream queue is gone
    #[error("Queue closed: {0}")]
    QueueClosed(String),

    /// Listener restarts exhausted the configured budget
    #[error("Restart limit reached after {0} attempts")]
    RestartLimit(u32),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

/// How a failed write should be treated by the queue worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection reset, timeout, too few relay acks: retry after cooldown
    Transient,
    /// The backend refused because of its own write spacing
    RateLimited,
    /// Anything else: sacrifice the item and keep draining
    Permanent,
}

/// Errors surfaced by a [`crate::net::PlatformClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The node rejected the write because of the per-identity spacing rule
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Node message
        message: String,
        /// Cooldown reported by the node, if any
        retry_after: Option<Duration>,
    },

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The call exceeded its deadline
    #[error("Platform call timed out after {0:?}")]
    Timeout(Duration),

    /// The node accepted the request but refused the operation
    #[error("Operation rejected: {0}")]
    Rejected(String),
}

impl PlatformError {
    /// Build an error from a bare node message using the same heuristics
    /// older bridge versions applied to free-text errors.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_message(&message) {
            FailureClass::RateLimited => PlatformError::RateLimited {
                message,
                retry_after: None,
            },
            FailureClass::Transient => PlatformError::Network(message),
            FailureClass::Permanent => PlatformError::Rejected(message),
        }
    }

    /// Classify for retry purposes.
    pub fn class(&self) -> FailureClass {
        match self {
            PlatformError::RateLimited { .. } => FailureClass::RateLimited,
            PlatformError::Network(_) | PlatformError::Timeout(_) => FailureClass::Transient,
            PlatformError::Rejected(_) => FailureClass::Permanent,
        }
    }
}

/// Errors surfaced by a [`crate::net::RelayTransport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Could not reach the relay endpoint
    #[error("Connection to {endpoint} failed: {reason}")]
    Connect {
        /// Relay URL
        endpoint: String,
        /// Transport message
        reason: String,
    },

    /// The relay answered a publish with a negative OK
    #[error("Relay {endpoint} refused event: {reason}")]
    Refused {
        /// Relay URL
        endpoint: String,
        /// Relay message
        reason: String,
    },

    /// Fewer relays acknowledged a publish than required
    #[error("Published to {acked} relays, {required} required")]
    InsufficientAcks {
        /// Relays that accepted the event
        acked: usize,
        /// Configured minimum
        required: usize,
    },

    /// The call exceeded its deadline
    #[error("Relay call timed out after {0:?}")]
    Timeout(Duration),

    /// The signing key could not produce an event
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Subscription could not be opened
    #[error("Subscription failed: {0}")]
    Subscribe(String),
}

impl RelayError {
    /// Classify for retry purposes.
    pub fn class(&self) -> FailureClass {
        match self {
            RelayError::Signing(_) => FailureClass::Permanent,
            RelayError::Refused { reason, .. } => classify_message(reason),
            _ => FailureClass::Transient,
        }
    }
}

/// Classify a free-text backend message.
///
/// Matches the phrases Hive nodes and Node-style transports actually emit;
/// unknown messages are permanent.
pub fn classify_message(message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    if lower.contains("rate limit")
        || lower.contains("you may only post once every")
        || lower.contains("hive_min_root_comment_interval")
        || lower.contains("hive_min_reply_interval")
    {
        FailureClass::RateLimited
    } else if lower.contains("econnreset")
        || lower.contains("etimedout")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection reset")
        || lower.contains("socket hang up")
    {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}
