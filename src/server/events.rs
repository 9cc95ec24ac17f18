// Events read endpoint - exposes the correlation query filters over HTTP.

use super::{authorize, ApiError, ServerState};
use crate::events::EventType;
use crate::store::query::EventFilters;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Query parameters for GET /api/events
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub user_id: Option<String>,
    /// Single type or comma-separated list, e.g. "vote_cast,turn_completed"
    pub event_type: Option<String>,
    pub turn_id: Option<String>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn parse_event_types(raw: &str) -> Result<Vec<EventType>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            serde_json::from_value(Value::String(s.to_string()))
                .map_err(|_| ApiError::BadRequest(format!("Unknown event_type {:?}", s)))
        })
        .collect()
}

/// GET /api/events - filtered event listing, newest first
pub async fn get_events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize(&headers, &state.api_key)?;

    let event_types = match params.event_type.as_deref() {
        Some(raw) => parse_event_types(raw)?,
        None => Vec::new(),
    };

    let filters = EventFilters {
        user_id: params.user_id,
        event_types,
        turn_id: params.turn_id,
        start_ts: params.start_ts,
        end_ts: params.end_ts,
        limit: params.limit,
        offset: params.offset,
    };

    let query = state.query.clone();
    let (events, total) = tokio::task::spawn_blocking(move || {
        let events = query.get_events(&filters)?;
        let total = query.get_events_count(&filters)?;
        Ok::<_, anyhow::Error>((events, total))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task failed: {}", e)))?
    .map_err(|e| ApiError::Internal(format!("Query failed: {}", e)))?;

    Ok(Json(json!({
        "total": total,
        "returned": events.len(),
        "events": events,
    })))
}
