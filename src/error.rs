// Client-facing error taxonomy.
//
// Configuration problems carry an actionable suggestion in the message so a
// developer can fix their init call without reading source. Transport and
// storage failures are internal to the flush cycle and only surface when
// debug mode re-raises them.

use thiserror::Error;

/// Initialization failures; each message names the fix
#[derive(Debug, Error)]
pub enum InitError {
    #[error("userId is required - pass a stable, opaque identifier for the end user")]
    MissingUserId,

    #[error("endpoint required for server mode - pass the base URL of your ingest server")]
    MissingEndpoint,

    #[error("apiKey required for server mode - create one on the ingest server and pass it here")]
    MissingApiKey,

    #[error("endpoint {0:?} is not a valid URL - use an absolute http(s) URL without a trailing slash")]
    InvalidEndpoint(String),

    #[error("batch_size and max_batches must both be at least 1")]
    InvalidBatching,

    #[error("SDK is already initialized - init() may only be called once per process")]
    AlreadyInitialized,

    #[error("failed to prepare local storage at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Vote recording failures
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("vote value must be 1 or -1, got {0}")]
    InvalidValue(i64),

    #[error("turnId is required - pass the turn id returned by track_turn")]
    MissingTurnId,

    #[error("failed to record vote: {0}")]
    Track(#[from] TransportError),
}

/// Stats retrieval failures
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to read local events: {0}")]
    Storage(#[from] TransportError),

    #[error("stored events are corrupted: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failures while moving events out of the process (or onto disk).
/// These stay internal to the flush cycle: events are requeued and the
/// next cycle retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("ingest endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_errors_carry_suggestions() {
        assert!(InitError::MissingUserId.to_string().contains("identifier"));
        assert!(InitError::MissingEndpoint
            .to_string()
            .contains("endpoint required for server mode"));
    }

    #[test]
    fn test_vote_error_names_bad_value() {
        assert_eq!(
            VoteError::InvalidValue(3).to_string(),
            "vote value must be 1 or -1, got 3"
        );
    }

    #[test]
    fn test_transport_rejection_includes_status() {
        let e = TransportError::Rejected {
            status: 401,
            body: "Invalid API key".into(),
        };
        assert!(e.to_string().contains("401"));
        assert!(e.to_string().contains("Invalid API key"));
    }
}
