//! Simple-Chat Node Client
//!
//! Small on-device servers speak a minimal chat API and stream newline
//! delimited JSON. Replies are normalized into the OpenAI completion and
//! chunk shapes so nothing downstream needs to know the difference.
//!
//! # Node API
//!
//! - `GET /api/tags` - `{models: [{name}]}`
//! - `POST /api/chat` - `{response}` or `{message: {content}}`, plus `done`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{ChatChunk, ChatCompletion, ChunkReceiver, NodeClient, UpstreamRequest};
use super::{ensure_success, send_within, spawn_relay, unix_millis, unix_seconds, LineEvent};
use crate::error::{FarmError, FarmResult};
use crate::routing::NodeSpec;

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

/// Client for a simple-chat node
#[derive(Clone, Debug)]
pub struct SimpleChatClient {
    node: String,
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl SimpleChatClient {
    /// Client for the given node
    #[must_use]
    pub fn new(spec: &NodeSpec, http: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            node: spec.name.clone(),
            base_url: spec.base_url(),
            http,
            request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn body(request: &UpstreamRequest, stream: bool) -> Value {
        json!({
            "model": request.model.as_deref().unwrap_or_default(),
            "messages": request.messages,
            "stream": stream,
        })
    }

    /// Model label reported to callers
    fn label(&self, request: &UpstreamRequest) -> String {
        format!("farm/{}", request.model.as_deref().unwrap_or(&self.node))
    }

    fn probe_failure(&self, reason: impl Into<String>) -> FarmError {
        FarmError::Probe {
            node: self.node.clone(),
            reason: reason.into(),
        }
    }
}

/// Token text of one reply object
fn token(value: &Value) -> &str {
    value
        .get("response")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| value.pointer("/message/content").and_then(Value::as_str))
        .unwrap_or_default()
}

fn is_done(value: &Value) -> bool {
    value.get("done").and_then(Value::as_bool).unwrap_or(false)
}

/// Interpret one NDJSON line
fn parse_ndjson_line(node: &str, id: &str, model: &str, line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            debug!(node = %node, error = %err, "skipping unparseable stream line");
            return LineEvent::Skip;
        }
    };

    let text = token(&value);
    let content = (!text.is_empty()).then(|| text.to_string());
    if is_done(&value) {
        let last = ChatChunk::delta(id, model, unix_seconds(), content, Some("stop".to_string()));
        return LineEvent::Done(Some(last));
    }
    match content {
        Some(content) => {
            LineEvent::Chunk(ChatChunk::delta(id, model, unix_seconds(), Some(content), None))
        }
        None => LineEvent::Skip,
    }
}

#[async_trait]
impl NodeClient for SimpleChatClient {
    fn node(&self) -> &str {
        &self.node
    }

    async fn probe(&self, timeout: Duration) -> FarmResult<Option<Vec<String>>> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.probe_failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.probe_failure(format!("status {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| self.probe_failure(e.to_string()))?;
        if !body.contains("models") {
            return Err(self.probe_failure("tags body missing models marker"));
        }

        let models = serde_json::from_str::<TagList>(&body)
            .ok()
            .map(|tags| tags.models.into_iter().map(|t| t.name).collect::<Vec<_>>())
            .filter(|models| !models.is_empty());
        Ok(models)
    }

    async fn complete(&self, request: &UpstreamRequest) -> FarmResult<ChatCompletion> {
        let builder = self
            .http
            .post(self.url("/api/chat"))
            .timeout(self.request_timeout)
            .json(&Self::body(request, false));
        let response = send_within(&self.node, builder, self.request_timeout).await?;
        let response = ensure_success(&self.node, response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| FarmError::transport(&self.node, &e))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| FarmError::malformed(&self.node, &e))?;

        let finish_reason = match value.get("done").and_then(Value::as_bool) {
            Some(false) => "length",
            _ => "stop",
        };

        Ok(ChatCompletion::text(
            format!("chatcmpl-farm-{}", unix_millis()),
            self.label(request),
            unix_seconds(),
            token(&value),
            finish_reason,
        ))
    }

    async fn stream(&self, request: &UpstreamRequest) -> FarmResult<ChunkReceiver> {
        let builder = self
            .http
            .post(self.url("/api/chat"))
            .json(&Self::body(request, true));
        let response = send_within(&self.node, builder, self.request_timeout).await?;
        let response = ensure_success(&self.node, response).await?;

        let node = self.node.clone();
        let id = format!("chatcmpl-farm-{}", unix_millis());
        let model = self.label(request);
        Ok(spawn_relay(
            self.node.clone(),
            response,
            self.request_timeout,
            move |line| parse_ndjson_line(&node, &id, &model, line),
        ))
    }
}
