// Ingest endpoint - validates, deduplicates, and stores event batches.
//
// The body is parsed as loose JSON so one malformed event becomes a
// per-event error count instead of failing the whole request. Only two
// things reject the request outright: bad auth and an oversized batch.

use super::{authorize, ApiError, ServerState, MAX_BATCH_SIZE};
use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

/// POST /api/events - body is either a bare event object or {events: [...]}
///
/// Response: `{success: true, stats: {processed, skipped, errors}}` with
/// status 200 even when individual events fail validation.
pub async fn ingest_events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    authorize(&headers, &state.api_key)?;

    let raw_events: Vec<Value> = match body {
        Value::Object(ref obj) if obj.contains_key("events") => obj
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ApiError::BadRequest("events must be an array".to_string()))?,
        Value::Object(_) => vec![body],
        _ => {
            return Err(ApiError::BadRequest(
                "Body must be an event object or {events: [...]}".to_string(),
            ))
        }
    };

    if raw_events.len() > MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest("Batch size too large".to_string()));
    }

    let store = state.store.clone();
    let count = raw_events.len();
    let stats = tokio::task::spawn_blocking(move || store.ingest(raw_events))
        .await
        .map_err(|e| ApiError::Internal(format!("Ingest task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Ingest failed: {}", e)))?;

    tracing::debug!(
        "Ingested batch of {}: {} processed, {} skipped, {} errors",
        count,
        stats.processed,
        stats.skipped,
        stats.errors
    );

    Ok(Json(json!({ "success": true, "stats": stats })))
}
