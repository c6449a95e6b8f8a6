//! HTTP surface for the Chroma gateway.
//!
//! Two routes are exposed:
//!
//! - `GET /health` – Round-trip to Chroma. Answers 200 with `chroma_connected: true`, or 503
//!   with the failure message.
//! - `POST /api` – Single action endpoint. The `x-chroma-api-token` header must match the
//!   configured token. The JSON body names an `action` (`upsert`, `upsert_json`,
//!   `delete_file`, `delete_collection`, `show_collection`, `count`, `query`) plus its fields.
//!
//! Every failure is answered with `{"error": message}` and appended to the error log.

mod handlers;

pub use handlers::Action;

use crate::{
    chroma::ChromaError,
    config::Config,
    logging::ErrorLog,
    processing::{DocumentReader, ReaderError, StoreApi, StoreError},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Header carrying the caller's API token.
pub const API_TOKEN_HEADER: &str = "x-chroma-api-token";
/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "chroma-api";

/// Shared state handed to every request.
pub struct AppState<S> {
    store: Arc<S>,
    reader: Arc<DocumentReader>,
    api_token: Option<String>,
    max_workers: usize,
    error_log: ErrorLog,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            reader: Arc::clone(&self.reader),
            api_token: self.api_token.clone(),
            max_workers: self.max_workers,
            error_log: self.error_log.clone(),
        }
    }
}

impl<S> AppState<S> {
    /// Assemble router state from configuration.
    pub fn new(store: Arc<S>, reader: Arc<DocumentReader>, config: &Config) -> Self {
        Self::with_parts(
            store,
            reader,
            config.api_token.clone(),
            config.max_workers,
            ErrorLog::new(config.error_log_path.clone()),
        )
    }

    /// Assemble router state from explicit parts.
    pub fn with_parts(
        store: Arc<S>,
        reader: Arc<DocumentReader>,
        api_token: Option<String>,
        max_workers: usize,
        error_log: ErrorLog,
    ) -> Self {
        Self {
            store,
            reader,
            api_token,
            max_workers,
            error_log,
        }
    }
}

/// Build the HTTP router.
pub fn create_router<S>(state: AppState<S>) -> Router
where
    S: StoreApi + 'static,
{
    Router::new()
        .route("/health", get(health::<S>))
        .route("/api", post(handle_api::<S>))
        .with_state(state)
}

/// Failures surfaced by `POST /api`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Token header missing or wrong.
    #[error("Unauthorized: Invalid or missing API token")]
    Unauthorized,
    /// Request body or fields failed validation.
    #[error("{0}")]
    Validation(String),
    /// Action name not in the dispatch table.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    /// Document could not be read or chunked.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) | Self::UnknownAction(_) => StatusCode::BAD_REQUEST,
            Self::Reader(error) if error.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Validation(_))
            | Self::Store(StoreError::Chroma(ChromaError::InvalidCollectionName { .. })) => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(StoreError::Embedding(error)) if error.is_auth() => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health<S>(State(state): State<AppState<S>>) -> Response
where
    S: StoreApi,
{
    match state.store.heartbeat().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "chroma_connected": true,
        }))
        .into_response(),
        Err(error) => {
            state
                .error_log
                .record(&format!("Health check failed: {error}"));
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": SERVICE_NAME,
                    "chroma_connected": false,
                    "error": error.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn handle_api<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: StoreApi,
{
    match process(&state, &headers, &body).await {
        Ok(payload) => Json(payload).into_response(),
        Err(error) => {
            state.error_log.record(&error.to_string());
            error.into_response()
        }
    }
}

/// Authenticate, parse, and dispatch a single request.
async fn process<S>(state: &AppState<S>, headers: &HeaderMap, body: &[u8]) -> Result<Value, ApiError>
where
    S: StoreApi,
{
    authorize(state.api_token.as_deref(), headers)?;
    let payload = parse_payload(body)?;
    let action = resolve_action(&payload)?;
    tracing::info!(action = action.name(), "Dispatching action");
    handlers::dispatch(action, state, payload).await
}

fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers
        .get(API_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    match (expected, presented) {
        (Some(expected), Some(presented)) if !expected.is_empty() && presented == expected => {
            Ok(())
        }
        _ => Err(ApiError::Unauthorized),
    }
}

fn parse_payload(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) if !fields.is_empty() => Ok(fields),
        _ => Err(ApiError::Validation("No JSON data provided".into())),
    }
}

fn resolve_action(payload: &Map<String, Value>) -> Result<Action, ApiError> {
    let name = match payload.get("action") {
        None => return Err(ApiError::Validation("No action specified".into())),
        Some(value) if handlers::is_blank(value) => {
            return Err(ApiError::Validation("No action specified".into()));
        }
        Some(Value::String(name)) => name.clone(),
        Some(other) => other.to_string(),
    };
    Action::from_name(&name).ok_or(ApiError::UnknownAction(name))
}
