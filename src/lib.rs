// bilan - Telemetry pipeline for AI-assisted applications
//
// Host applications wrap each model invocation ("turn") with the SDK; the
// pipeline observes success/failure, captures privacy-processed content,
// correlates user feedback with the originating turn, and persists one
// unified event stream queryable for analytics.
//
// Architecture:
// - Turn tracker: wraps async AI calls with timeout, retry, classification
// - Privacy-aware pipeline: capture levels, PII redaction, durable batching
// - Transport: local store writer or authenticated HTTP ingest poster
// - Ingest server (axum): validation, dedup, SQLite event store
// - Query layer: turn <-> vote <-> conversation <-> journey correlation

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod privacy;
pub mod queue;
pub mod sdk;
pub mod server;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod transport;
pub mod turn;

pub use classify::{classify, ErrorKind};
pub use config::{InitConfig, Mode, ServerConfig};
pub use error::{InitError, StatsError, TransportError, VoteError};
pub use events::{Event, EventType};
pub use privacy::{CaptureLevel, ContentClass, PrivacyConfig, PrivacyController};
pub use queue::BatchingConfig;
pub use sdk::{init, stats, track_turn, vote, BilanSdk, UserStats};
pub use tracker::ContentPayload;
