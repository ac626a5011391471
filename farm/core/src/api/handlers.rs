//! Request Handlers
//!
//! Framing only: every routing decision is made by the [`Dispatcher`].

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, warn};

use super::types::{ChatCompletionBody, ErrorBody, HealthResponse, ModelList, NodeHealth};
use super::AppState;
use crate::error::FarmError;
use crate::routing::{DispatchOutcome, FarmStream};
use crate::streaming::StreamEvent;

/// Message of the catch-all 404
pub const NOT_FOUND_MESSAGE: &str = "Use /v1/chat/completions, /v1/models, or /health";

impl IntoResponse for FarmError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorBody::from(&self))).into_response()
    }
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match ChatCompletionBody::parse(&body) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "rejected chat request");
            return err.into_response();
        }
    };

    match state.dispatcher.dispatch(request).await {
        Ok(DispatchOutcome::Complete(completion)) => Json(completion).into_response(),
        Ok(DispatchOutcome::Stream(stream)) => sse_response(stream),
        Err(err) => {
            warn!(error = %err, status = err.status_code().as_u16(), "dispatch failed");
            err.into_response()
        }
    }
}

/// `GET /v1/models`
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::from_nodes(&state.dispatcher.registry().snapshot()))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.dispatcher.registry();
    let snapshot = registry.snapshot();
    let healthy = snapshot.iter().filter(|n| n.healthy).count();

    Json(HealthResponse {
        status: if healthy > 0 { "ok" } else { "degraded" }.to_string(),
        healthy,
        total: snapshot.len(),
        queued: state.dispatcher.queued(),
        uptime_ms: u64::try_from(registry.started_at().elapsed().as_millis()).unwrap_or(u64::MAX),
        nodes: snapshot.iter().map(NodeHealth::from).collect(),
    })
}

/// CORS pre-flight
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Unknown paths: pre-flight for any OPTIONS, JSON 404 otherwise
pub async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    (StatusCode::NOT_FOUND, Json(json!({ "error": NOT_FOUND_MESSAGE }))).into_response()
}

/// Frame relayed stream events as server-sent events
///
/// Dropping the body (caller gone) drops the event receiver, which ends the
/// relay and frees the node.
fn sse_response(stream: FarmStream) -> Response {
    let node = stream.node;
    let frames = ReceiverStream::new(stream.events).map(move |event| {
        let frame = match event {
            StreamEvent::Chunk(chunk) => match serde_json::to_string(&chunk) {
                Ok(json) => format!("data: {json}\n\n"),
                Err(err) => {
                    warn!(node = %node, error = %err, "dropping unserializable chunk");
                    String::new()
                }
            },
            StreamEvent::Done => "data: [DONE]\n\n".to_string(),
            StreamEvent::Aborted(err) => {
                let body = json!({
                    "error": { "message": err.to_string(), "type": "farm_error" }
                });
                format!("data: {body}\n\n")
            }
        };
        Ok::<_, Infallible>(Bytes::from(frame))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
