//! Wire types of the HTTP front
//!
//! Request bodies are parsed leniently into [`ChatCompletionBody`] and then
//! validated into a [`ChatRequest`]; response bodies mirror the field names
//! callers already depend on (`uptimeMs`, `avgMs`, `owned_by`).

use serde::{Deserialize, Serialize};

use crate::backend::{ChatMessage, ChatRequest};
use crate::error::{FarmError, FarmResult};
use crate::routing::NodeState;

/// Body of `POST /v1/chat/completions`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatCompletionBody {
    /// Requested model id; `"auto"` or absent means any
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    /// Stream the response as server-sent events
    #[serde(default)]
    pub stream: Option<bool>,
    /// Token limit for the completion
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatCompletionBody {
    /// Parse raw request bytes
    ///
    /// # Errors
    ///
    /// [`FarmError::BadRequest`] when the bytes are not JSON, do not match
    /// the request schema, or carry no messages.
    pub fn parse(bytes: &[u8]) -> FarmResult<ChatRequest> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|_| FarmError::BadRequest("Invalid JSON".to_string()))?;
        let body: Self = serde_json::from_value(value)
            .map_err(|e| FarmError::BadRequest(format!("Invalid request body: {e}")))?;
        body.into_request()
    }

    /// Validate into a dispatchable request
    ///
    /// # Errors
    ///
    /// [`FarmError::BadRequest`] when `messages` is missing or empty.
    pub fn into_request(self) -> FarmResult<ChatRequest> {
        let messages = match self.messages {
            Some(messages) if !messages.is_empty() => messages,
            _ => {
                return Err(FarmError::BadRequest(
                    "messages must be a non-empty array".to_string(),
                ))
            }
        };

        let mut request = ChatRequest::new(messages).with_stream(self.stream.unwrap_or(false));
        if let Some(model) = self.model {
            request = request.with_model(model);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        Ok(request)
    }
}

/// `{error:{message}}` or `{error:{message, type}}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Error details
    pub error: ErrorDetail,
}

/// Message and class of an error
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Human-readable message
    pub message: String,
    /// Error class; absent for client errors
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl From<&FarmError> for ErrorBody {
    fn from(err: &FarmError) -> Self {
        let kind = match err {
            FarmError::BadRequest(_) => None,
            _ => Some("farm_error".to_string()),
        };
        Self {
            error: ErrorDetail {
                message: err.to_string(),
                kind,
            },
        }
    }
}

/// Response of `GET /health`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` when at least one node is healthy, else `degraded`
    pub status: String,
    /// Healthy nodes
    pub healthy: usize,
    /// Configured nodes
    pub total: usize,
    /// Requests waiting for capacity
    pub queued: usize,
    /// Milliseconds since the router started
    pub uptime_ms: u64,
    /// Per-node detail
    pub nodes: Vec<NodeHealth>,
}

/// One node in `GET /health`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    /// Node name
    pub name: String,
    /// Preference tier
    pub tier: String,
    /// Latest probe verdict
    pub healthy: bool,
    /// Requests in flight
    pub busy: u32,
    /// Concurrency limit
    pub parallel: u32,
    /// Advertised models
    pub models: Vec<String>,
    /// Requests dispatched
    pub requests: u64,
    /// Requests failed
    pub errors: u64,
    /// Average latency, rounded
    pub avg_ms: u64,
    /// Milliseconds since the node came up; 0 while down
    pub uptime_ms: u64,
}

impl From<&NodeState> for NodeHealth {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(node: &NodeState) -> Self {
        Self {
            name: node.spec.name.clone(),
            tier: node.spec.tier.as_str().to_string(),
            healthy: node.healthy,
            busy: node.busy,
            parallel: node.spec.parallel,
            models: node.models.clone(),
            requests: node.total_requests,
            errors: node.total_errors,
            avg_ms: node.avg_latency_ms.max(0.0).round() as u64,
            uptime_ms: node.uptime().map_or(0, |d| d.as_millis() as u64),
        }
    }
}

/// Response of `GET /v1/models`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelList {
    /// Always `list`
    pub object: String,
    /// Models of healthy nodes
    pub data: Vec<ModelEntry>,
}

/// One advertised model
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Model id as advertised by the node
    pub id: String,
    /// Always `model`
    pub object: String,
    /// `farm-<node>`
    pub owned_by: String,
}

impl ModelList {
    /// Aggregate the models of every healthy node
    #[must_use]
    pub fn from_nodes(nodes: &[NodeState]) -> Self {
        let data = nodes
            .iter()
            .filter(|n| n.healthy)
            .flat_map(|n| {
                n.models.iter().map(move |id| ModelEntry {
                    id: id.clone(),
                    object: "model".to_string(),
                    owned_by: format!("farm-{}", n.name()),
                })
            })
            .collect();
        Self {
            object: "list".to_string(),
            data,
        }
    }
}
