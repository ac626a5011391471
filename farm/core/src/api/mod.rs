//! OpenAI-compatible HTTP Front
//!
//! ```text
//! POST    /v1/chat/completions   dispatch (JSON or server-sent events)
//! GET     /v1/models             models of healthy nodes
//! GET     /health                farm status and per-node counters
//! OPTIONS *                      204 pre-flight
//! *       *                      404 with a usage hint
//! ```
//!
//! Every response carries permissive CORS headers.

pub mod handlers;
pub mod types;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::routing::Dispatcher;

pub use handlers::NOT_FOUND_MESSAGE;
pub use types::{ChatCompletionBody, ErrorBody, HealthResponse, ModelList, NodeHealth};

/// Allowed request headers advertised to browsers
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, ngrok-skip-browser-warning, x-stream";

/// Allowed methods advertised to browsers
pub const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// State shared by all handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Routes chat requests and owns the registry
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// State over a dispatcher
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Build the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(handlers::chat_completions).options(handlers::preflight),
        )
        .route("/v1/models", get(handlers::list_models).options(handlers::preflight))
        .route("/health", get(handlers::health).options(handlers::preflight))
        .fallback(handlers::fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
}
