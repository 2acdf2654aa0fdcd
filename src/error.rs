//! Error types for feedtrace

use thiserror::Error;

/// Errors that can occur while turning event logs into analytics
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Problems found in an individual event.
///
/// These never abort a computation; consumers skip the offending event and
/// keep going. `EventLog::validate` reports them for diagnostics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventValidationError {
    #[error("Action {action} requires a post_id")]
    MissingPostId { action: String },

    #[error("Non-finite timestamp on {action}")]
    NonFiniteTimestamp { action: String },

    #[error("Timestamp {ts_ms} precedes previous event at {previous_ms}")]
    OutOfOrder { ts_ms: f64, previous_ms: f64 },
}
