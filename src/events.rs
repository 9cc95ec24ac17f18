// Unified event record shared by the client SDK, the transport layer, and
// the ingest server.
//
// Every observable action - a turn starting, a vote being cast, a journey
// step - becomes one Event. Correlation keys (turn_id, conversation_id,
// journey_id, turn_sequence) are promoted to top-level fields so the store
// can index them without JSON extraction on the hot path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Closed set of event types understood by the pipeline.
///
/// The store rejects anything outside this set, so adding a variant means
/// adding it to the schema CHECK constraint as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TurnCreated,
    TurnCompleted,
    TurnFailed,
    UserAction,
    VoteCast,
    JourneyStep,
    ConversationStarted,
    ConversationEnded,
    RegenerationRequested,
    FrustrationDetected,
}

impl EventType {
    /// All variants, in schema order
    pub const ALL: [EventType; 10] = [
        EventType::TurnCreated,
        EventType::TurnCompleted,
        EventType::TurnFailed,
        EventType::UserAction,
        EventType::VoteCast,
        EventType::JourneyStep,
        EventType::ConversationStarted,
        EventType::ConversationEnded,
        EventType::RegenerationRequested,
        EventType::FrustrationDetected,
    ];

    /// The snake_case wire name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TurnCreated => "turn_created",
            EventType::TurnCompleted => "turn_completed",
            EventType::TurnFailed => "turn_failed",
            EventType::UserAction => "user_action",
            EventType::VoteCast => "vote_cast",
            EventType::JourneyStep => "journey_step",
            EventType::ConversationStarted => "conversation_started",
            EventType::ConversationEnded => "conversation_ended",
            EventType::RegenerationRequested => "regeneration_requested",
            EventType::FrustrationDetected => "frustration_detected",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single telemetry event.
///
/// Canonical JSON is snake_case; camelCase field names are accepted on the
/// way in (serde aliases) because older clients emitted them. Unknown
/// top-level fields are ignored, unknown `properties.*` entries are kept
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(alias = "eventId")]
    pub event_id: String,

    #[serde(alias = "userId")]
    pub user_id: String,

    #[serde(alias = "eventType")]
    pub event_type: EventType,

    /// Milliseconds since epoch; must be positive
    pub timestamp: i64,

    /// Heterogeneous JSON bag; shape depends on event_type
    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Privacy-processed prompt content (never raw user content)
    #[serde(alias = "promptText", default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,

    /// Privacy-processed response content
    #[serde(alias = "aiResponse", default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,

    // Correlation keys promoted to top-level columns for index efficiency
    #[serde(alias = "journeyId", default, skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<String>,

    #[serde(alias = "conversationId", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(alias = "turnSequence", default, skip_serializing_if = "Option::is_none")]
    pub turn_sequence: Option<i64>,

    #[serde(alias = "turnId", default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

impl Event {
    /// Build a new event with a fresh id and the current wall-clock time.
    /// Correlation keys are promoted from `properties` immediately.
    pub fn new(event_type: EventType, user_id: impl Into<String>, properties: Map<String, Value>) -> Self {
        let mut event = Self {
            event_id: new_event_id(),
            user_id: user_id.into(),
            event_type,
            timestamp: now_ms(),
            properties,
            prompt_text: None,
            ai_response: None,
            journey_id: None,
            conversation_id: None,
            turn_sequence: None,
            turn_id: None,
        };
        event.promote_correlation_keys();
        event
    }

    /// Copy correlation keys from `properties` into the dedicated columns
    /// when the columns are not already set. Accepts both casings to bridge
    /// legacy records.
    pub fn promote_correlation_keys(&mut self) {
        fn prop_str(props: &Map<String, Value>, keys: &[&str]) -> Option<String> {
            keys.iter()
                .find_map(|k| props.get(*k).and_then(Value::as_str))
                .map(str::to_owned)
        }

        if self.turn_id.is_none() {
            self.turn_id = prop_str(&self.properties, &["turn_id", "turnId"]);
        }
        if self.conversation_id.is_none() {
            self.conversation_id = prop_str(&self.properties, &["conversation_id", "conversationId"]);
        }
        if self.journey_id.is_none() {
            self.journey_id = prop_str(&self.properties, &["journey_id", "journeyId"]);
        }
        if self.turn_sequence.is_none() {
            self.turn_sequence = self
                .properties
                .get("turn_sequence")
                .or_else(|| self.properties.get("turnSequence"))
                .and_then(Value::as_i64);
        }
    }

    /// Check the invariants that do not require cross-event state.
    ///
    /// Cross-event referential integrity (turn_completed referencing a prior
    /// turn_created) is deliberately not enforced here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.is_empty() {
            return Err(ValidationError::MissingEventId);
        }
        if self.user_id.is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if self.timestamp <= 0 {
            return Err(ValidationError::InvalidTimestamp(self.timestamp));
        }

        if self.event_type == EventType::VoteCast {
            let value = self.properties.get("value").and_then(Value::as_i64);
            if !matches!(value, Some(1) | Some(-1)) {
                return Err(ValidationError::InvalidVoteValue);
            }
            let has_target = ["turn_id", "turnId", "prompt_id", "promptId"]
                .iter()
                .any(|k| self.properties.get(*k).and_then(Value::as_str).is_some());
            if !has_target {
                return Err(ValidationError::MissingVoteTarget);
            }
        }

        Ok(())
    }
}

/// Why an event failed validation at the ingest boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("event_id is required")]
    MissingEventId,
    #[error("user_id is required")]
    MissingUserId,
    #[error("timestamp must be a positive integer, got {0}")]
    InvalidTimestamp(i64),
    #[error("vote_cast requires properties.value of 1 or -1")]
    InvalidVoteValue,
    #[error("vote_cast requires properties.turn_id (or legacy prompt_id)")]
    MissingVoteTarget,
}

/// Current wall-clock time in milliseconds since epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate an event id: `evt_<ms>_<9 alphanumeric chars>`
pub fn new_event_id() -> String {
    format!("evt_{}_{}", now_ms(), random_suffix(9))
}

/// Generate a turn id: `turn_<ms>_<9 alphanumeric chars>`
pub fn new_turn_id() -> String {
    format!("turn_{}_{}", now_ms(), random_suffix(9))
}

/// Generate a conversation id: `conv_<ms>_<9 alphanumeric chars>`
pub fn new_conversation_id() -> String {
    format!("conv_{}_{}", now_ms(), random_suffix(9))
}

/// Short random base-36 suffix without a crypto dependency.
///
/// RandomState gives us a randomly-seeded hasher per call; mixing in a
/// process-wide counter keeps ids unique even within one millisecond.
/// Residual collision risk is absorbed by idempotent dedup at ingest.
fn random_suffix(len: usize) -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
    let mut n = hasher.finish();

    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        out.push(ALPHABET[(n % 36) as usize] as char);
        n /= 36;
        if n == 0 {
            // Re-seed so long suffixes do not trail with '0'
            n = RandomState::new().build_hasher().finish();
        }
    }
    out
}
