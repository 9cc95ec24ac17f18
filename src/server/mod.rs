//! Ingest server - authenticated HTTP surface in front of the event store.
//!
//! Endpoints return JSON and are designed for SDK clients and dashboard
//! backends. All endpoints require the configured API key except /health.
//! CORS is permissive by echo: the preflight response mirrors the
//! requesting origin and method so browser SDKs can post directly.

mod events;
mod ingest;

use crate::config::ServerConfig;
use crate::store::query::EventQuery;
use crate::store::EventStore;
use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;

pub use events::get_events;
pub use ingest::ingest_events;

/// Maximum events accepted in one ingest request
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Shared state for request handlers
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<EventStore>,
    pub query: Arc<EventQuery>,
    pub api_key: Arc<str>,
}

impl ServerState {
    pub fn new(store: EventStore, api_key: &str) -> Self {
        let query = EventQuery::new(store.pool());
        Self {
            store: Arc::new(store),
            query: Arc::new(query),
            api_key: Arc::from(api_key),
        }
    }
}

/// API error responses, converted to HTTP status codes via IntoResponse
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        tracing::debug!("API error: {} - {}", status, message);

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Check the `Authorization: Bearer <key>` header against the configured key
pub(crate) fn authorize(headers: &HeaderMap, api_key: &str) -> Result<(), ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(ApiError::Unauthorized("Missing API key".to_string()));
    };

    let presented = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if presented.is_empty() || presented != api_key {
        return Err(ApiError::Unauthorized("Invalid API key".to_string()));
    }
    Ok(())
}

/// GET /health - liveness probe, no auth required
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": crate::events::now_ms(),
    }))
}

/// CORS by echo: preflights answer with the requested origin and method,
/// other responses carry the allow-origin header for the caller's origin.
async fn cors(request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();
    let requested_method = request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_METHOD)
        .cloned();

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        if let Some(origin) = origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        if let Some(method) = requested_method {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, method);
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            header::HeaderValue::from_static("authorization, content-type"),
        );
        return response;
    }

    let mut response = next.run(request).await;
    if let Some(origin) = origin {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    response
}

/// Build the router over the given state (also used directly by tests)
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route(
            "/api/events",
            post(ingest::ingest_events).get(events::get_events),
        )
        .route("/health", get(health))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Start the ingest server
pub async fn start_server(
    config: ServerConfig,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let store = EventStore::open(&config.db_path, config.environment)
        .context("Failed to open event store")?;
    tracing::info!("Event store ready at {}", config.db_path.display());

    let state = ServerState::new(store, &config.api_key);
    let app = build_router(state);

    tracing::info!("Starting ingest server on {}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Ingest server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Ingest server shut down gracefully");
    Ok(())
}
