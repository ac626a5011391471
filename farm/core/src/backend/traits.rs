//! Node Client Traits
//!
//! Wire types shared by every backend client plus the [`NodeClient`] trait.
//! The chat types follow the OpenAI chat-completions shape, which is also the
//! shape the farm returns to its callers; simple-chat nodes are normalized
//! into it by their client.
//!
//! Response types keep every field they do not name in an `extra` map, so
//! an OpenAI node's reply (tool calls, fingerprints, logprobs, usage-only
//! chunks) reaches the caller intact.
//!
//! # Design Philosophy
//!
//! A client knows how to talk to exactly one node. It does not track health,
//! busy slots or latency; the registry does. Streaming clients hand back a
//! channel receiver fed by a spawned task, and dropping the receiver aborts
//! the upstream request.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::FarmResult;

// ============================================================================
// Messages
// ============================================================================

/// Content of a chat message: plain text or an array of content parts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Multimodal content parts, forwarded untouched
    Parts(Vec<Value>),
    /// Anything else (including `null`), forwarded untouched
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessageContent {
    /// The text, when the content is a plain string
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One message of a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant`, ...
    pub role: String,
    /// Message body
    #[serde(default)]
    pub content: MessageContent,
}

impl ChatMessage {
    /// Text message with the given role
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A caller's chat request after validation
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Requested model id; `None` when absent or `auto`
    pub model: Option<String>,
    /// Conversation, never empty
    pub messages: Vec<ChatMessage>,
    /// Stream token deltas back to the caller
    pub stream: bool,
    /// Caller's `max_tokens`, if any
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Non-streaming request for the given conversation
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            stream: false,
            max_tokens: None,
        }
    }

    /// Set the requested model; `auto` and empty ids mean "any"
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = if model.is_empty() || model == "auto" {
            None
        } else {
            Some(model)
        };
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What a client sends to its node
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    /// Model id understood by the node; `None` lets the client pick its default
    pub model: Option<String>,
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Token limit
    pub max_tokens: u32,
}

// ============================================================================
// Responses
// ============================================================================

/// Token accounting reported by the node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Generated tokens
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum of both
    #[serde(default)]
    pub total_tokens: u64,
    /// Fields passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

/// Assistant message inside a completion choice
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Always `assistant` in practice
    #[serde(default = "assistant_role")]
    pub role: String,
    /// Generated text
    #[serde(default)]
    pub content: Option<String>,
    /// Fields passed through untouched, e.g. `tool_calls`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One completion choice
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Generated message
    pub message: ResponseMessage,
    /// Why generation stopped
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Fields passed through untouched, e.g. `logprobs`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Routing metadata attached to every non-streaming completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FarmMeta {
    /// Node that served the request
    pub node: String,
    /// Wall-clock latency on that node
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    /// Set when the request was served by the fallback node
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

fn completion_object() -> String {
    "chat.completion".to_string()
}

/// Non-streaming chat completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Completion id
    #[serde(default)]
    pub id: String,
    /// Always `chat.completion`
    #[serde(default = "completion_object")]
    pub object: String,
    /// Unix seconds
    #[serde(default)]
    pub created: i64,
    /// Model that produced the completion
    #[serde(default)]
    pub model: String,
    /// Generated choices
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token accounting
    #[serde(default)]
    pub usage: Usage,
    /// Routing metadata, added by the dispatcher
    #[serde(rename = "_farm", default, skip_serializing_if = "Option::is_none")]
    pub farm: Option<FarmMeta>,
    /// Fields passed through untouched, e.g. `system_fingerprint`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletion {
    /// Single-choice assistant completion with zero usage
    pub fn text(
        id: impl Into<String>,
        model: impl Into<String>,
        created: i64,
        content: impl Into<String>,
        finish_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: completion_object(),
            created,
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: assistant_role(),
                    content: Some(content.into()),
                    extra: Map::new(),
                },
                finish_reason: Some(finish_reason.into()),
                extra: Map::new(),
            }],
            usage: Usage::default(),
            farm: None,
            extra: Map::new(),
        }
    }

    /// Text of the first choice
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}

/// Incremental message in a streamed chunk
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Role announcement, usually only in the first chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Token text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Fields passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One choice of a streamed chunk
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Incremental message
    #[serde(default)]
    pub delta: Delta,
    /// Set on the final chunk
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Fields passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

/// One streamed `chat.completion.chunk`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Completion id, shared by all chunks of a stream
    #[serde(default)]
    pub id: String,
    /// Always `chat.completion.chunk`
    #[serde(default = "chunk_object")]
    pub object: String,
    /// Unix seconds
    #[serde(default)]
    pub created: i64,
    /// Model producing the stream
    #[serde(default)]
    pub model: String,
    /// Choices carried by this chunk
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Fields passed through untouched, e.g. a final `usage`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatChunk {
    /// Single-choice chunk with the given delta text and finish reason
    pub fn delta(
        id: impl Into<String>,
        model: impl Into<String>,
        created: i64,
        content: Option<String>,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: chunk_object(),
            created,
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content,
                    extra: Map::new(),
                },
                finish_reason,
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    /// Delta text of the first choice
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    /// Replace the delta text of the first choice
    pub fn set_content(&mut self, content: Option<String>) {
        if let Some(choice) = self.choices.first_mut() {
            choice.delta.content = content;
        }
    }

    /// Finish reason of the first choice
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first()?.finish_reason.as_deref()
    }
}

// ============================================================================
// Client Trait
// ============================================================================

/// Receiver for a node's streamed chunks
///
/// The channel closes after the last chunk. An `Err` item means the upstream
/// stream broke and nothing more will follow.
pub type ChunkReceiver = mpsc::Receiver<FarmResult<ChatChunk>>;

/// Client for one farm node
///
/// Implement this trait to support another node protocol.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Name of the node this client talks to
    fn node(&self) -> &str;

    /// Probe the node
    ///
    /// `Ok(Some(models))` when the node reported its models, `Ok(None)` when
    /// it is healthy but the model list was unavailable. Every HTTP call
    /// made by the probe is bounded by `timeout`.
    async fn probe(&self, timeout: Duration) -> FarmResult<Option<Vec<String>>>;

    /// Send a request and wait for the complete response
    async fn complete(&self, request: &UpstreamRequest) -> FarmResult<ChatCompletion>;

    /// Send a streaming request
    ///
    /// Resolves once the node answered with a success status; failures
    /// before that point are returned directly so the caller may fall back.
    async fn stream(&self, request: &UpstreamRequest) -> FarmResult<ChunkReceiver>;
}
