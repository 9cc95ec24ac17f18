// SDK façade - wires privacy, tracker, queue, and transport together and
// exposes the ergonomic surface host applications call.
//
// Components are wired by constructor injection; nothing in the pipeline
// reaches for globals. The process-wide convenience instance at the bottom
// of this file is plain sugar over one shared BilanSdk.

use crate::config::{InitConfig, Mode};
use crate::error::{InitError, StatsError, TransportError, VoteError};
use crate::events::{new_conversation_id, Event, EventType};
use crate::privacy::PrivacyController;
use crate::queue::{EventQueue, EventSink};
use crate::storage::{FileStore, KeyValueStore};
use crate::tracker::{ContentPayload, EventTracker};
use crate::transport::{HttpTransport, LocalTransport};
use crate::turn::TurnTracker;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;

/// Zero-valued aggregate over locally retained events; also the safe
/// fallback when the SDK is uninitialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total_events: usize,
    pub total_votes: usize,
    pub positive_votes: usize,
    pub negative_votes: usize,
    pub total_turns: usize,
    pub failed_turns: usize,
}

/// The assembled client pipeline for one user
pub struct BilanSdk {
    debug: bool,
    storage: Arc<dyn KeyValueStore>,
    queue: Arc<EventQueue>,
    tracker: Arc<EventTracker>,
    turn: TurnTracker,
}

impl std::fmt::Debug for BilanSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BilanSdk").field("debug", &self.debug).finish()
    }
}

impl BilanSdk {
    /// Initialize with file-backed local storage in the platform data dir
    pub async fn init(config: InitConfig) -> Result<Self, InitError> {
        config.validate()?;
        let data_dir = config.resolved_data_dir();
        let storage = FileStore::new(&data_dir).map_err(|source| InitError::Storage {
            path: data_dir.display().to_string(),
            source,
        })?;
        Self::init_with_store(config, Arc::new(storage)).await
    }

    /// Initialize over a caller-provided store (tests, embedded hosts)
    pub async fn init_with_store(
        config: InitConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, InitError> {
        config.validate()?;

        let sink: Arc<dyn EventSink> = match config.mode {
            Mode::Local => Arc::new(LocalTransport::new(storage.clone(), &config.user_id)),
            Mode::Server => {
                // validate() guarantees both are present in server mode
                let endpoint = config.endpoint.clone().unwrap_or_default();
                let api_key = config.api_key.clone().unwrap_or_default();
                Arc::new(
                    HttpTransport::new(endpoint, api_key)
                        .map_err(|e| InitError::HttpClient(e.to_string()))?,
                )
            }
        };

        let queue = Arc::new(EventQueue::new(
            config.batching.clone(),
            sink,
            storage.clone(),
        ));
        if let Err(e) = queue.load_persisted().await {
            tracing::warn!("Failed to restore queue snapshot, starting empty: {}", e);
        }
        queue.start_periodic();

        let privacy = Arc::new(PrivacyController::new(config.privacy.clone()));
        let tracker = Arc::new(EventTracker::new(
            config.user_id.clone(),
            privacy,
            queue.clone(),
        ));
        let turn = TurnTracker::new(tracker.clone(), config.timeout_ms);

        tracing::debug!(
            "SDK initialized for user {} ({:?} mode)",
            config.user_id,
            config.mode
        );

        Ok(Self {
            debug: config.debug,
            storage,
            queue,
            tracker,
            turn,
        })
    }

    /// Track an arbitrary event. In normal mode tracking failures are
    /// logged and swallowed (returns Ok(None)); debug mode re-raises.
    pub async fn track(
        &self,
        event_type: EventType,
        properties: Map<String, Value>,
        content: Option<ContentPayload>,
    ) -> Result<Option<Event>, TransportError> {
        match self.tracker.track(event_type, properties, content).await {
            Ok(event) => Ok(Some(event)),
            Err(e) if self.debug => Err(e),
            Err(e) => {
                tracing::warn!("Tracking failed (swallowed): {}", e);
                Ok(None)
            }
        }
    }

    /// Wrap an AI call; see TurnTracker::track_turn
    pub async fn track_turn<T, F, Fut>(
        &self,
        prompt_text: &str,
        ai_call: F,
        properties: &Map<String, Value>,
    ) -> anyhow::Result<(T, String)>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.turn.track_turn(prompt_text, ai_call, properties).await
    }

    /// Wrap an AI call with retries; see TurnTracker::track_turn_with_retry
    pub async fn track_turn_with_retry<T, F, Fut>(
        &self,
        prompt_text: &str,
        ai_call: F,
        properties: &Map<String, Value>,
        max_retries: u32,
    ) -> anyhow::Result<(T, String)>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.turn
            .track_turn_with_retry(prompt_text, ai_call, properties, max_retries)
            .await
    }

    /// Record a ±1 judgment of a turn's response
    pub async fn vote(
        &self,
        turn_id: &str,
        value: i64,
        comment: Option<&str>,
    ) -> Result<(), VoteError> {
        if value != 1 && value != -1 {
            return Err(VoteError::InvalidValue(value));
        }
        if turn_id.trim().is_empty() {
            return Err(VoteError::MissingTurnId);
        }

        let mut props = Map::new();
        props.insert("value".into(), json!(value));
        props.insert("turn_id".into(), json!(turn_id));
        if let Some(comment) = comment {
            props.insert("comment".into(), json!(comment));
        }

        match self.tracker.track(EventType::VoteCast, props, None).await {
            Ok(_) => Ok(()),
            Err(e) if self.debug => Err(VoteError::Track(e)),
            Err(e) => {
                tracing::warn!("Vote tracking failed (swallowed): {}", e);
                Ok(())
            }
        }
    }

    /// Start a conversation; returns the generated conversation id
    pub async fn start_conversation(&self) -> Result<String, TransportError> {
        let conversation_id = new_conversation_id();
        let mut props = Map::new();
        props.insert("conversation_id".into(), json!(conversation_id));
        self.track(EventType::ConversationStarted, props, None).await?;
        Ok(conversation_id)
    }

    pub async fn end_conversation(&self, conversation_id: &str) -> Result<(), TransportError> {
        let mut props = Map::new();
        props.insert("conversation_id".into(), json!(conversation_id));
        self.track(EventType::ConversationEnded, props, None).await?;
        Ok(())
    }

    /// Mark progression through a named journey
    pub async fn track_journey_step(
        &self,
        journey_name: &str,
        step_name: &str,
    ) -> Result<(), TransportError> {
        let mut props = Map::new();
        props.insert("journey_id".into(), json!(journey_name));
        props.insert("journey_name".into(), json!(journey_name));
        props.insert("step_name".into(), json!(step_name));
        self.track(EventType::JourneyStep, props, None).await?;
        Ok(())
    }

    /// The user asked for the response to be regenerated
    pub async fn record_regeneration(&self, turn_id: &str) -> Result<(), TransportError> {
        let mut props = Map::new();
        props.insert("turn_id".into(), json!(turn_id));
        self.track(EventType::RegenerationRequested, props, None).await?;
        Ok(())
    }

    /// A frustration signal (rapid retries, abandonment, explicit feedback)
    pub async fn record_frustration(
        &self,
        turn_id: &str,
        signal: &str,
    ) -> Result<(), TransportError> {
        let mut props = Map::new();
        props.insert("turn_id".into(), json!(turn_id));
        props.insert("signal".into(), json!(signal));
        self.track(EventType::FrustrationDetected, props, None).await?;
        Ok(())
    }

    /// Aggregate over the locally retained events for this user
    pub async fn stats(&self) -> Result<UserStats, StatsError> {
        let events = LocalTransport::read_events(self.storage.as_ref(), self.tracker.user_id())
            .map_err(StatsError::Storage)?;

        let mut stats = UserStats {
            total_events: events.len(),
            ..Default::default()
        };
        for event in &events {
            match event.event_type {
                EventType::VoteCast => {
                    stats.total_votes += 1;
                    match event.properties.get("value").and_then(Value::as_i64) {
                        Some(1) => stats.positive_votes += 1,
                        Some(-1) => stats.negative_votes += 1,
                        _ => {}
                    }
                }
                EventType::TurnCreated => stats.total_turns += 1,
                EventType::TurnFailed => stats.failed_turns += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Force-deliver everything currently queued
    pub async fn flush(&self) -> Result<(), TransportError> {
        self.queue.flush(true).await
    }

    /// Stop the periodic flush and deliver the remaining events
    pub async fn destroy(&self) -> Result<(), TransportError> {
        self.queue.destroy().await
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process-wide convenience instance
// ─────────────────────────────────────────────────────────────────────────────

static GLOBAL: OnceLock<BilanSdk> = OnceLock::new();

/// Initialize the process-wide instance. May only succeed once.
pub async fn init(config: InitConfig) -> Result<(), InitError> {
    let sdk = BilanSdk::init(config).await?;
    GLOBAL
        .set(sdk)
        .map_err(|_| InitError::AlreadyInitialized)
}

/// The process-wide instance, if init() has run
pub fn global() -> Option<&'static BilanSdk> {
    GLOBAL.get()
}

/// Top-level vote. Uninitialized SDKs accept and ignore votes so callers
/// never have to guard their feedback UI on telemetry state.
pub async fn vote(turn_id: &str, value: i64, comment: Option<&str>) -> Result<(), VoteError> {
    match global() {
        Some(sdk) => sdk.vote(turn_id, value, comment).await,
        None => {
            tracing::debug!("vote() before init(); ignoring");
            Ok(())
        }
    }
}

/// Top-level stats. Returns zeroed stats when uninitialized.
pub async fn stats() -> Result<UserStats, StatsError> {
    match global() {
        Some(sdk) => sdk.stats().await,
        None => Ok(UserStats::default()),
    }
}

/// Top-level turn wrapper. When the SDK is uninitialized the AI call runs
/// untracked and the turn id comes back empty.
pub async fn track_turn<T, F, Fut>(
    prompt_text: &str,
    ai_call: F,
    properties: &Map<String, Value>,
) -> anyhow::Result<(T, String)>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match global() {
        Some(sdk) => sdk.track_turn(prompt_text, ai_call, properties).await,
        None => {
            tracing::debug!("track_turn() before init(); running untracked");
            let result = ai_call().await?;
            Ok((result, String::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    async fn sdk() -> BilanSdk {
        let mut config = InitConfig::local("u1");
        config.batching.flush_interval_ms = 60_000;
        BilanSdk::init_with_store(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let config = InitConfig::local("");
        let err = BilanSdk::init_with_store(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, InitError::MissingUserId));
    }

    #[tokio::test]
    async fn test_turn_vote_stats_flow() {
        let sdk = sdk().await;

        let (answer, turn_id) = sdk
            .track_turn("Hi", || async { Ok("Hello".to_string()) }, &Map::new())
            .await
            .unwrap();
        assert_eq!(answer, "Hello");

        sdk.vote(&turn_id, 1, Some("good answer")).await.unwrap();
        sdk.flush().await.unwrap();

        let stats = sdk.stats().await.unwrap();
        assert_eq!(stats.total_turns, 1);
        assert_eq!(stats.failed_turns, 0);
        assert_eq!(stats.total_votes, 1);
        assert_eq!(stats.positive_votes, 1);
        assert_eq!(stats.total_events, 3); // turn_created + turn_completed + vote_cast
    }

    #[tokio::test]
    async fn test_vote_validation() {
        let sdk = sdk().await;
        assert!(matches!(
            sdk.vote("turn_1", 0, None).await,
            Err(VoteError::InvalidValue(0))
        ));
        assert!(matches!(
            sdk.vote("", 1, None).await,
            Err(VoteError::MissingTurnId)
        ));
    }

    #[tokio::test]
    async fn test_conversation_and_journey_helpers() {
        let sdk = sdk().await;

        let conversation_id = sdk.start_conversation().await.unwrap();
        assert!(conversation_id.starts_with("conv_"));
        sdk.end_conversation(&conversation_id).await.unwrap();
        sdk.track_journey_step("onboarding", "welcome").await.unwrap();
        sdk.record_regeneration("turn_1").await.unwrap();
        sdk.record_frustration("turn_1", "rapid_retry").await.unwrap();
        sdk.flush().await.unwrap();

        let stats = sdk.stats().await.unwrap();
        assert_eq!(stats.total_events, 5);
    }

    #[tokio::test]
    async fn test_stats_empty_store_is_zeroed() {
        let sdk = sdk().await;
        assert_eq!(sdk.stats().await.unwrap(), UserStats::default());
    }

    #[tokio::test]
    async fn test_global_fallbacks_before_init() {
        // Tests never call init(), so the global stays unset here
        assert!(vote("turn_1", 1, None).await.is_ok());
        assert_eq!(stats().await.unwrap(), UserStats::default());

        let (result, turn_id) = track_turn(
            "Hi",
            || async { Ok("untracked".to_string()) },
            &Map::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, "untracked");
        assert!(turn_id.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_delivers_pending_events() {
        let sdk = sdk().await;
        sdk.track(EventType::UserAction, Map::new(), None).await.unwrap();
        sdk.destroy().await.unwrap();
        assert_eq!(sdk.stats().await.unwrap().total_events, 1);
    }
}
