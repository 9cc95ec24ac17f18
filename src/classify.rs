// Error classification for failed AI calls.
//
// Raw provider errors are messy strings; the dashboard and retry logic need
// a closed taxonomy. Matching is case-insensitive substring matching on a
// lowercased form of the message, evaluated top to bottom, first match wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of failure kinds attached to turn_failed events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimit,
    ServiceUnavailable,
    ContextLimit,
    AuthError,
    NetworkError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::ContextLimit => "context_limit",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }

    /// Kinds where another attempt cannot succeed without operator action
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::AuthError | ErrorKind::ContextLimit)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed timeout message, kept verbatim even when the configured timeout
/// differs (observable behavior contract)
pub const TIMEOUT_MESSAGE: &str = "AI request timed out after 30 seconds";

/// Synthetic error raised when the timeout race wins
pub const TIMEOUT_RAISED: &str = "AI request timeout";

/// Map a raw error message to `(kind, canonical_message)`.
///
/// The canonical message replaces the raw one for every kind except
/// `unknown_error`, which passes the raw message through verbatim.
pub fn classify(raw: &str) -> (ErrorKind, String) {
    let msg = raw.to_lowercase();

    let contains_any = |signals: &[&str]| signals.iter().any(|s| msg.contains(s));

    if contains_any(&["ai_timeout", "request timeout"]) {
        (ErrorKind::Timeout, TIMEOUT_MESSAGE.to_string())
    } else if contains_any(&["429", "rate limit", "quota"]) {
        (ErrorKind::RateLimit, "AI service rate limit exceeded".to_string())
    } else if contains_any(&["503", "service unavailable", "temporarily unavailable"]) {
        (
            ErrorKind::ServiceUnavailable,
            "AI service temporarily unavailable".to_string(),
        )
    } else if msg.contains("context") && msg.contains("limit") {
        (ErrorKind::ContextLimit, "Context length limit exceeded".to_string())
    } else if contains_any(&["401", "403", "unauthorized", "api key"]) {
        (ErrorKind::AuthError, "AI service authentication failed".to_string())
    } else if contains_any(&["network", "connection", "fetch"]) {
        (
            ErrorKind::NetworkError,
            "Network error while contacting AI service".to_string(),
        )
    } else {
        (ErrorKind::UnknownError, raw.to_string())
    }
}
