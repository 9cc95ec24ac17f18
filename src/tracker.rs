// Event tracker - assembles events and hands them to the queue.
//
// This is the only place events are born on the client: ids and timestamps
// are stamped here, content goes through the privacy controller before it
// touches the event, and correlation keys are promoted for the store's
// indexed columns.

use crate::error::TransportError;
use crate::events::{Event, EventType};
use crate::privacy::{ContentClass, PrivacyController};
use crate::queue::EventQueue;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Raw content attached to a tracked event; processed before storage
#[derive(Debug, Clone, Default)]
pub struct ContentPayload {
    pub prompt_text: Option<String>,
    pub ai_response: Option<String>,
    /// Free-form context merged into properties under "context"
    pub context: Option<Value>,
}

impl ContentPayload {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            prompt_text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Builds and enqueues events for one user
pub struct EventTracker {
    user_id: String,
    privacy: Arc<PrivacyController>,
    queue: Arc<EventQueue>,
}

impl EventTracker {
    pub fn new(user_id: impl Into<String>, privacy: Arc<PrivacyController>, queue: Arc<EventQueue>) -> Self {
        Self {
            user_id: user_id.into(),
            privacy,
            queue,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn privacy(&self) -> &PrivacyController {
        &self.privacy
    }

    /// Construct an event, privacy-process its content, and enqueue it.
    /// Returns the enqueued event so callers can correlate follow-ups.
    pub async fn track(
        &self,
        event_type: EventType,
        mut properties: Map<String, Value>,
        content: Option<ContentPayload>,
    ) -> Result<Event, TransportError> {
        if let Some(context) = content.as_ref().and_then(|c| c.context.clone()) {
            properties.insert("context".to_string(), context);
        }

        let mut event = Event::new(event_type, self.user_id.clone(), properties);

        if let Some(content) = content {
            if let Some(prompt) = content.prompt_text.as_deref() {
                event.prompt_text = self.privacy.process(prompt, ContentClass::Prompts);
            }
            if let Some(response) = content.ai_response.as_deref() {
                event.ai_response = self.privacy.process(response, ContentClass::Responses);
            }
        }

        tracing::trace!("Tracking {} event {}", event.event_type, event.event_id);
        self.queue.enqueue(event.clone()).await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::{CaptureLevel, PrivacyConfig};
    use crate::queue::BatchingConfig;
    use crate::storage::MemoryStore;
    use crate::transport::LocalTransport;
    use serde_json::json;

    fn tracker_with_level(level: CaptureLevel) -> (EventTracker, Arc<EventQueue>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(LocalTransport::new(store.clone(), "u1"));
        let queue = Arc::new(EventQueue::new(
            BatchingConfig {
                batch_size: 100,
                flush_interval_ms: 60_000,
                max_batches: 10,
            },
            sink,
            store,
        ));
        let privacy = Arc::new(PrivacyController::new(PrivacyConfig {
            default_level: level,
            ..Default::default()
        }));
        (EventTracker::new("u1", privacy, queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_track_stamps_id_timestamp_and_user() {
        let (tracker, queue) = tracker_with_level(CaptureLevel::Full);
        let event = tracker
            .track(EventType::UserAction, Map::new(), None)
            .await
            .unwrap();

        assert!(event.event_id.starts_with("evt_"));
        assert!(event.timestamp > 0);
        assert_eq!(event.user_id, "u1");
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn test_track_routes_content_through_privacy() {
        let (tracker, _queue) = tracker_with_level(CaptureLevel::Sanitized);
        let content = ContentPayload {
            prompt_text: Some("mail a@b.com".into()),
            ai_response: Some("ok, mailed a@b.com".into()),
            context: None,
        };
        let event = tracker
            .track(EventType::TurnCompleted, Map::new(), Some(content))
            .await
            .unwrap();

        assert_eq!(event.prompt_text.as_deref(), Some("mail [REDACTED]"));
        assert_eq!(event.ai_response.as_deref(), Some("ok, mailed [REDACTED]"));
    }

    #[tokio::test]
    async fn test_track_suppresses_content_at_level_none() {
        let (tracker, _queue) = tracker_with_level(CaptureLevel::None);
        let event = tracker
            .track(
                EventType::TurnCompleted,
                Map::new(),
                Some(ContentPayload::prompt("secret")),
            )
            .await
            .unwrap();
        assert!(event.prompt_text.is_none());
    }

    #[tokio::test]
    async fn test_context_merged_into_properties() {
        let (tracker, _queue) = tracker_with_level(CaptureLevel::Full);
        let content = ContentPayload {
            context: Some(json!({"screen": "checkout"})),
            ..Default::default()
        };
        let event = tracker
            .track(EventType::UserAction, Map::new(), Some(content))
            .await
            .unwrap();
        assert_eq!(event.properties["context"]["screen"], json!("checkout"));
    }

    #[tokio::test]
    async fn test_correlation_keys_promoted() {
        let (tracker, _queue) = tracker_with_level(CaptureLevel::Full);
        let mut props = Map::new();
        props.insert("turn_id".into(), json!("turn_x"));
        props.insert("conversation_id".into(), json!("conv_x"));
        let event = tracker
            .track(EventType::VoteCast, props, None)
            .await
            .unwrap();
        assert_eq!(event.turn_id.as_deref(), Some("turn_x"));
        assert_eq!(event.conversation_id.as_deref(), Some("conv_x"));
    }
}
