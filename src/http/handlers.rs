//! HTTP request handlers

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{LaunchError, StreamError};
use crate::session::{self, StreamBody};
use crate::state::AppState;

/// HTTP error type, rendered as `{"error": .., "detail": ..}`
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    InternalError { error: String, detail: String },
    BadGateway { error: String, detail: String },
    Unavailable(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, String::new()),
            HttpError::InternalError { error, detail } => {
                (StatusCode::INTERNAL_SERVER_ERROR, error, detail)
            }
            HttpError::BadGateway { error, detail } => (StatusCode::BAD_GATEWAY, error, detail),
            HttpError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, String::new()),
        };

        let body = if detail.is_empty() {
            serde_json::json!({ "error": error })
        } else {
            serde_json::json!({ "error": error, "detail": detail })
        };

        (status, Json(body)).into_response()
    }
}

impl From<StreamError> for HttpError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Launch(LaunchError::EmptySource) => {
                HttpError::BadRequest("Source path must not be empty".to_string())
            }
            StreamError::Launch(e) => HttpError::InternalError {
                error: "Failed to start transcoder".to_string(),
                detail: e.to_string(),
            },
            StreamError::Read(e) => HttpError::BadGateway {
                error: "Failed to read transcoder output".to_string(),
                detail: e.to_string(),
            },
            StreamError::ProcessExit { status, detail } => HttpError::BadGateway {
                error: format!("Transcoder exited with {}", status),
                detail,
            },
            e @ StreamError::AtCapacity { .. } => HttpError::Unavailable(e.to_string()),
        }
    }
}

/// Query parameters for the stream endpoint
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Source handed to the transcoder; the configured default when absent
    pub path: Option<String>,
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("transcode-relay v", env!("CARGO_PKG_VERSION"))
}

/// Stream endpoint
/// GET /stream?path={source}
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, HttpError> {
    let source = query
        .path
        .unwrap_or_else(|| state.config.stream.default_source.clone());

    let request = state
        .launcher
        .request(source.as_str())
        .map_err(StreamError::from)?;

    let body = match session::open(Arc::clone(&state), request).await {
        Ok(body) => body,
        Err(e) => {
            state.metrics.record_rejected(e.kind());
            tracing::warn!(source = %source, "stream request failed: {}", e);
            return Err(e.into());
        }
    };

    let body = match body {
        StreamBody::Relay(relay) => Body::from_stream(relay),
        StreamBody::Empty => Body::empty(),
    };

    Ok((stream_headers(&state), body).into_response())
}

/// Headers sent ahead of a relayed stream
fn stream_headers(state: &AppState) -> HeaderMap {
    let content_type = HeaderValue::from_str(&state.config.stream.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("video/mp4"));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers
}

/// Debug endpoint - active sessions
pub async fn active_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions: Vec<_> = state
        .active_sessions()
        .into_iter()
        .map(|s| {
            serde_json::json!({
                "session_id": s.id.to_string(),
                "source": s.source,
                "pid": s.pid,
                "started_at": s.started_at.to_rfc3339(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "count": sessions.len(),
        "limit": state.limiter.limit(),
        "in_use": state.limiter.in_use(),
        "sessions": sessions,
    }))
}
