//! Fake farm nodes for integration tests
//!
//! Each [`FakeNode`] is a real HTTP server on `127.0.0.1:0` speaking either
//! the `openai` or the `simple-chat` protocol, with canned replies and a
//! record of every chat body it received. [`Behaviour`] makes an `openai`
//! node misbehave in specific ways.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use farm_core::{
    create_router, AppState, Dispatcher, FarmConfig, HealthMonitor, NodeSpec, NodeTier, Protocol,
};

#[derive(Clone)]
struct Script {
    node: String,
    models: Vec<String>,
    reply: String,
    fragments: Vec<String>,
    behaviour: Behaviour,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

/// How an `openai` fake answers outside the happy path
#[derive(Clone, Debug)]
pub struct Behaviour {
    /// Body of `GET /health`
    pub health_body: &'static str,
    /// Status of `GET /v1/models`
    pub models_status: StatusCode,
    /// Status of `POST /v1/chat/completions`; non-2xx answers carry an error text
    pub chat_status: StatusCode,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            health_body: r#"{"status":"ok"}"#,
            models_status: StatusCode::OK,
            chat_status: StatusCode::OK,
        }
    }
}

impl Script {
    fn record(&self, body: Value) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().push(body);
    }
}

/// A fake inference node
pub struct FakeNode {
    /// Bound address
    pub addr: SocketAddr,
    protocol: Protocol,
    script: Script,
}

impl FakeNode {
    /// OpenAI-style node
    pub async fn openai(node: &str, models: &[&str], reply: &str, fragments: &[&str]) -> Self {
        Self::openai_with(node, models, reply, fragments, Behaviour::default()).await
    }

    /// OpenAI-style node with non-default behaviour
    pub async fn openai_with(
        node: &str,
        models: &[&str],
        reply: &str,
        fragments: &[&str],
        behaviour: Behaviour,
    ) -> Self {
        let mut script = script(node, models, reply, fragments);
        script.behaviour = behaviour;
        let app = Router::new()
            .route("/health", get(openai_health))
            .route("/v1/models", get(openai_models))
            .route("/v1/chat/completions", post(openai_chat))
            .with_state(script.clone());
        Self {
            addr: serve(app).await,
            protocol: Protocol::OpenAi,
            script,
        }
    }

    /// simple-chat node
    pub async fn simple_chat(node: &str, models: &[&str], reply: &str, fragments: &[&str]) -> Self {
        let script = script(node, models, reply, fragments);
        let app = Router::new()
            .route("/api/tags", get(simple_tags))
            .route("/api/chat", post(simple_chat))
            .with_state(script.clone());
        Self {
            addr: serve(app).await,
            protocol: Protocol::SimpleChat,
            script,
        }
    }

    /// Node spec pointing at this server
    pub fn spec(&self, tier: NodeTier, parallel: u32) -> NodeSpec {
        NodeSpec::new(
            &self.script.node,
            "127.0.0.1",
            self.addr.port(),
            self.protocol,
            tier,
        )
        .with_parallel(parallel)
    }

    /// Chat requests received
    pub fn hits(&self) -> usize {
        self.script.hits.load(Ordering::SeqCst)
    }

    /// Body of the latest chat request
    pub fn last_body(&self) -> Option<Value> {
        self.script.bodies.lock().last().cloned()
    }
}

fn script(node: &str, models: &[&str], reply: &str, fragments: &[&str]) -> Script {
    Script {
        node: node.to_string(),
        models: models.iter().map(|m| (*m).to_string()).collect(),
        reply: reply.to_string(),
        fragments: fragments.iter().map(|f| (*f).to_string()).collect(),
        behaviour: Behaviour::default(),
        hits: Arc::new(AtomicUsize::new(0)),
        bodies: Arc::new(Mutex::new(Vec::new())),
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Spec for a node nobody listens on
pub async fn dead_node(name: &str, tier: NodeTier) -> NodeSpec {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    NodeSpec::new(name, "127.0.0.1", port, Protocol::OpenAi, tier).with_parallel(2)
}

async fn openai_health(State(script): State<Script>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        script.behaviour.health_body,
    )
        .into_response()
}

async fn openai_models(State(script): State<Script>) -> Response {
    if !script.behaviour.models_status.is_success() {
        return (script.behaviour.models_status, "models unavailable").into_response();
    }
    let data: Vec<Value> = script.models.iter().map(|id| json!({"id": id})).collect();
    Json(json!({"object": "list", "data": data})).into_response()
}

async fn openai_chat(State(script): State<Script>, Json(body): Json<Value>) -> Response {
    let stream = body["stream"].as_bool().unwrap_or(false);
    script.record(body);

    if !script.behaviour.chat_status.is_success() {
        return (script.behaviour.chat_status, "upstream exploded").into_response();
    }

    if !stream {
        return Json(json!({
            "id": "chatcmpl-fake",
            "object": "chat.completion",
            "created": 1,
            "model": script.models.first().cloned().unwrap_or_default(),
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": script.reply},
                "finish_reason": "stop"
            }],
            "system_fingerprint": "fp_fake",
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5,
                      "completion_tokens_details": {"reasoning_tokens": 1}}
        }))
        .into_response();
    }

    let mut sse = String::new();
    let role = json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "m",
        "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]});
    sse.push_str(&format!("data: {role}\n\n"));
    for fragment in &script.fragments {
        let chunk = json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "m",
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]});
        sse.push_str(&format!("data: {chunk}\n\n"));
    }
    let last = json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "m",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]});
    sse.push_str(&format!("data: {last}\n\ndata: [DONE]\n\n"));

    ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
}

async fn simple_tags(State(script): State<Script>) -> Json<Value> {
    let models: Vec<Value> = script.models.iter().map(|name| json!({"name": name})).collect();
    Json(json!({"models": models}))
}

async fn simple_chat(State(script): State<Script>, Json(body): Json<Value>) -> Response {
    let stream = body["stream"].as_bool().unwrap_or(false);
    script.record(body);

    if !stream {
        return Json(json!({
            "message": {"role": "assistant", "content": script.reply},
            "done": true
        }))
        .into_response();
    }

    let mut ndjson = String::new();
    for fragment in &script.fragments {
        ndjson.push_str(&json!({"message": {"content": fragment}, "done": false}).to_string());
        ndjson.push('\n');
    }
    ndjson.push_str(&json!({"done": true}).to_string());
    ndjson.push('\n');
    ([(header::CONTENT_TYPE, "application/x-ndjson")], ndjson).into_response()
}

// =============================================================================
// Farm Under Test
// =============================================================================

/// Farm router over the given nodes, after one probing round
pub async fn farm(nodes: Vec<NodeSpec>) -> (Dispatcher, Router) {
    let mut config = FarmConfig::default();
    config.nodes = nodes;
    config.probe_timeout = Duration::from_secs(1);
    config.request_timeout = Duration::from_secs(5);
    config.queue_timeout = Duration::from_secs(2);
    let dispatcher = Dispatcher::from_config(&config).unwrap();
    HealthMonitor::new(dispatcher.clone(), &config).tick().await;
    let router = create_router(AppState::new(dispatcher.clone()));
    (dispatcher, router)
}

/// Send a request through the router
pub async fn call(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// POST a chat body and parse the JSON answer
pub async fn chat(router: &Router, body: Value) -> (StatusCode, Value) {
    let (status, text) = call(router, Method::POST, "/v1/chat/completions", &body.to_string()).await;
    (status, serde_json::from_str(&text).unwrap())
}

/// Payloads of an SSE body, `[DONE]` included
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// Visible text of an SSE body
pub fn sse_text(body: &str) -> String {
    sse_payloads(body)
        .iter()
        .filter(|p| p.as_str() != "[DONE]")
        .filter_map(|p| serde_json::from_str::<Value>(p).ok())
        .filter_map(|v| v["choices"][0]["delta"]["content"].as_str().map(str::to_string))
        .collect()
}
