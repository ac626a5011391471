//! OpenAI-Style Node Client
//!
//! # Node API
//!
//! - `GET /health` - liveness, body contains `ok`
//! - `GET /v1/models` - `{data: [{id}]}`
//! - `POST /v1/chat/completions` - JSON, or SSE when `stream` is set

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::traits::{ChatChunk, ChatCompletion, ChunkReceiver, NodeClient, UpstreamRequest};
use super::{ensure_success, send_within, spawn_relay, LineEvent};
use crate::error::{FarmError, FarmResult};
use crate::routing::{normalize_model_id, NodeSpec};

/// Model id sent when the node advertised none
const DEFAULT_MODEL: &str = "default";

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Client for an OpenAI-compatible node
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    node: String,
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl OpenAiClient {
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

    fn body(request: &UpstreamRequest, stream: bool) -> serde_json::Value {
        json!({
            "model": request.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "stream": stream,
        })
    }

    fn probe_failure(&self, reason: impl Into<String>) -> FarmError {
        FarmError::Probe {
            node: self.node.clone(),
            reason: reason.into(),
        }
    }

    async fn list_models(&self, timeout: Duration) -> Option<Vec<String>> {
        let response = self
            .http
            .get(self.url("/v1/models"))
            .timeout(timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let list: ModelList = response.json().await.ok()?;
        let models: Vec<String> = list
            .data
            .iter()
            .map(|m| normalize_model_id(&m.id))
            .collect();
        (!models.is_empty()).then_some(models)
    }
}

/// Interpret one SSE line
fn parse_sse_line(node: &str, line: &str) -> LineEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return LineEvent::Done(None);
    }
    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => LineEvent::Chunk(chunk),
        Err(err) => {
            debug!(node = %node, error = %err, "skipping unparseable stream event");
            LineEvent::Skip
        }
    }
}

#[async_trait]
impl NodeClient for OpenAiClient {
    fn node(&self) -> &str {
        &self.node
    }

    async fn probe(&self, timeout: Duration) -> FarmResult<Option<Vec<String>>> {
        let response = self
            .http
            .get(self.url("/health"))
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
        if !body.contains("ok") {
            return Err(self.probe_failure("health body missing ok marker"));
        }

        Ok(self.list_models(timeout).await)
    }

    async fn complete(&self, request: &UpstreamRequest) -> FarmResult<ChatCompletion> {
        let builder = self
            .http
            .post(self.url("/v1/chat/completions"))
            .timeout(self.request_timeout)
            .json(&Self::body(request, false));
        let response = send_within(&self.node, builder, self.request_timeout).await?;
        let response = ensure_success(&self.node, response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| FarmError::transport(&self.node, &e))?;
        serde_json::from_str(&text).map_err(|e| FarmError::malformed(&self.node, &e))
    }

    async fn stream(&self, request: &UpstreamRequest) -> FarmResult<ChunkReceiver> {
        let builder = self
            .http
            .post(self.url("/v1/chat/completions"))
            .json(&Self::body(request, true));
        let response = send_within(&self.node, builder, self.request_timeout).await?;
        let response = ensure_success(&self.node, response).await?;

        let node = self.node.clone();
        Ok(spawn_relay(
            self.node.clone(),
            response,
            self.request_timeout,
            move |line| parse_sse_line(&node, line),
        ))
    }
}
