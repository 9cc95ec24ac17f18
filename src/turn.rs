// Turn tracker - wraps an async AI call with timeout, classification, and
// paired lifecycle events.
//
// Every wrapped call emits turn_created when it starts and exactly one of
// turn_completed / turn_failed when it settles, all carrying the same
// turn_id. The AI error always re-raises to the caller after the failure
// event is emitted - the caller owns recovery, the pipeline only observes.
//
// No locks are held across the AI call or the backoff sleeps; concurrent
// turns only meet each other inside the event queue.

use crate::classify::{classify, TIMEOUT_RAISED};
use crate::events::{new_turn_id, now_ms, EventType};
use crate::privacy::ContentClass;
use crate::tracker::{ContentPayload, EventTracker};
use anyhow::anyhow;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default AI call timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Wraps caller-provided async AI functions with telemetry
pub struct TurnTracker {
    tracker: Arc<EventTracker>,
    timeout: Duration,
}

impl TurnTracker {
    pub fn new(tracker: Arc<EventTracker>, timeout_ms: u64) -> Self {
        Self {
            tracker,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Track a single AI call. Returns the call's result together with the
    /// generated turn id so votes and follow-ups can reference it.
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
        self.run_attempt(prompt_text, ai_call(), properties, 0).await
    }

    /// Track with retries. Attempts run 0..=max_retries; auth and
    /// context-limit failures are terminal and never retried. Backoff
    /// between attempts is `2^attempt` seconds, no jitter.
    pub async fn track_turn_with_retry<T, F, Fut>(
        &self,
        prompt_text: &str,
        mut ai_call: F,
        properties: &Map<String, Value>,
        max_retries: u32,
    ) -> anyhow::Result<(T, String)>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_err = None;

        for attempt in 0..=max_retries {
            match self
                .run_attempt(prompt_text, ai_call(), properties, attempt)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    let (kind, _) = classify(&err.to_string());
                    last_err = Some(err);
                    if !kind.is_retryable() {
                        tracing::debug!("Not retrying {} failure", kind);
                        break;
                    }
                    if attempt < max_retries {
                        let backoff = Duration::from_millis(1000 * 2u64.pow(attempt));
                        tracing::debug!("Retrying after {:?} (attempt {})", backoff, attempt + 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_err.expect("at least one attempt ran"))
    }

    /// One attempt: emit the start event, race the call against the
    /// timeout, emit the settle event, and hand back the result or error.
    async fn run_attempt<T, Fut>(
        &self,
        prompt_text: &str,
        fut: Fut,
        properties: &Map<String, Value>,
        retry_count: u32,
    ) -> anyhow::Result<(T, String)>
    where
        T: Serialize,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let turn_id = new_turn_id();
        let started_at = now_ms();

        let mut started = properties.clone();
        started.insert("turn_id".into(), json!(turn_id));
        started.insert("started_at".into(), json!(started_at));
        started.insert("retry_count".into(), json!(retry_count));
        self.emit(
            EventType::TurnCreated,
            started,
            ContentPayload::prompt(prompt_text),
        )
        .await;

        let outcome = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(TIMEOUT_RAISED)),
        };

        match outcome {
            Ok(result) => {
                let completed_at = now_ms();
                let response_time = (completed_at - started_at) as f64 / 1000.0;
                let (response_text, response_length) = stringify_response(&result);

                let mut props = properties.clone();
                props.insert("turn_id".into(), json!(turn_id));
                props.insert("status".into(), json!("success"));
                props.insert("response_time".into(), json!(response_time));
                props.insert("response_length".into(), json!(response_length));
                props.insert("completed_at".into(), json!(completed_at));
                props.insert("retry_count".into(), json!(retry_count));

                let content = ContentPayload {
                    prompt_text: Some(prompt_text.to_string()),
                    ai_response: Some(response_text),
                    context: None,
                };
                self.emit(EventType::TurnCompleted, props, content).await;
                Ok((result, turn_id))
            }
            Err(err) => {
                let failed_at = now_ms();
                let attempted_duration = (failed_at - started_at) as f64 / 1000.0;
                let (kind, canonical) = classify(&err.to_string());
                let error_message = self
                    .tracker
                    .privacy()
                    .process(&canonical, ContentClass::Errors)
                    .unwrap_or_default();

                let mut props = properties.clone();
                props.insert("turn_id".into(), json!(turn_id));
                props.insert("status".into(), json!("failed"));
                props.insert("error_type".into(), json!(kind.as_str()));
                props.insert("error_message".into(), json!(error_message));
                props.insert("attempted_duration".into(), json!(attempted_duration));
                props.insert("failed_at".into(), json!(failed_at));
                props.insert("retry_count".into(), json!(retry_count));

                self.emit(
                    EventType::TurnFailed,
                    props,
                    ContentPayload::prompt(prompt_text),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Telemetry must never break the wrapped call: tracking failures are
    /// logged and swallowed.
    async fn emit(&self, event_type: EventType, props: Map<String, Value>, content: ContentPayload) {
        if let Err(e) = self.tracker.track(event_type, props, Some(content)).await {
            tracing::warn!("Failed to track {} event: {}", event_type, e);
        }
    }
}

/// Render a response for capture: strings stay as-is, everything else
/// becomes its JSON text. The length is measured on the rendered form.
/// Unserializable responses capture as empty rather than failing the turn.
fn stringify_response<T: Serialize>(result: &T) -> (String, usize) {
    let text = match serde_json::to_value(result) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(e) => {
            tracing::warn!("Response not serializable for capture: {}", e);
            String::new()
        }
    };
    let length = text.len();
    (text, length)
}
