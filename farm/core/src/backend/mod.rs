//! Farm Node Clients
//!
//! This module provides access to the farm's inference nodes through the
//! common [`NodeClient`] trait.
//!
//! # Available Protocols
//!
//! - **openai**: `/health`, `/v1/models`, `/v1/chat/completions` with SSE
//! - **simple-chat**: `/api/tags`, `/api/chat` with NDJSON streaming
//!
//! # Usage
//!
//! ```ignore
//! use farm_core::backend::{connect, ChatMessage, UpstreamRequest};
//!
//! let client = connect(&spec, http.clone(), Duration::from_secs(120));
//! let request = UpstreamRequest { model: None, messages: vec![ChatMessage::user("hi")], max_tokens: 1024 };
//! let completion = client.complete(&request).await?;
//! ```

mod openai;
mod simple_chat;
mod traits;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

pub use openai::OpenAiClient;
pub use simple_chat::SimpleChatClient;
pub use traits::{
    ChatChunk, ChatCompletion, ChatMessage, ChatRequest, Choice, ChunkChoice, ChunkReceiver,
    Delta, FarmMeta, MessageContent, NodeClient, ResponseMessage, UpstreamRequest, Usage,
};

use crate::error::{FarmError, FarmResult};
use crate::routing::{NodeSpec, Protocol};
use crate::streaming::LineBuffer;

/// Chunks buffered between an upstream relay task and its consumer
const RELAY_BUFFER: usize = 64;

/// Shared HTTP client for every node
///
/// Timeouts are applied per request: probes and completions use their own
/// bounds, streams are bounded per read.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
}

/// Build the client matching a node's protocol
#[must_use]
pub fn connect(
    spec: &NodeSpec,
    http: reqwest::Client,
    request_timeout: Duration,
) -> Arc<dyn NodeClient> {
    match spec.protocol {
        Protocol::OpenAi => Arc::new(OpenAiClient::new(spec, http, request_timeout)),
        Protocol::SimpleChat => Arc::new(SimpleChatClient::new(spec, http, request_timeout)),
    }
}

/// Pass 2xx responses through, turn everything else into an error
async fn ensure_success(node: &str, response: reqwest::Response) -> FarmResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FarmError::upstream_http(node, status.as_u16(), &body))
}

/// Send a request, bounding the wait for response headers
async fn send_within(
    node: &str,
    request: reqwest::RequestBuilder,
    limit: Duration,
) -> FarmResult<reqwest::Response> {
    match tokio::time::timeout(limit, request.send()).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(FarmError::transport(node, &err)),
        Err(_) => Err(FarmError::UpstreamTransport {
            node: node.to_string(),
            message: "request timed out".to_string(),
        }),
    }
}

/// What one upstream line means for the relay
enum LineEvent {
    /// Forward this chunk
    Chunk(ChatChunk),
    /// Nothing to forward
    Skip,
    /// End of stream, optionally after one last chunk
    Done(Option<ChatChunk>),
}

/// Relay a line-oriented streamed body as chunks
///
/// The spawned task stops when the upstream ends, when no bytes arrive for
/// `idle`, or as soon as the receiver is dropped, which also drops the
/// upstream connection.
fn spawn_relay<P>(
    node: String,
    response: reqwest::Response,
    idle: Duration,
    mut parse: P,
) -> ChunkReceiver
where
    P: FnMut(&str) -> LineEvent + Send + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();

        loop {
            let next = tokio::select! {
                () = tx.closed() => {
                    debug!(node = %node, "receiver dropped, aborting upstream stream");
                    return;
                }
                next = tokio::time::timeout(idle, body.next()) => next,
            };

            let bytes = match next {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    let _ = tx.send(Err(FarmError::transport(&node, &err))).await;
                    return;
                }
                Err(_) => {
                    let _ = tx
                        .send(Err(FarmError::UpstreamTransport {
                            node: node.clone(),
                            message: "stream timed out".to_string(),
                        }))
                        .await;
                    return;
                }
            };

            for line in lines.push(&bytes) {
                if !forward(&tx, parse(&line)).await {
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            forward(&tx, parse(&line)).await;
        }
    });

    rx
}

/// Returns false once the relay should stop
async fn forward(tx: &mpsc::Sender<FarmResult<ChatChunk>>, event: LineEvent) -> bool {
    match event {
        LineEvent::Skip => true,
        LineEvent::Chunk(chunk) => tx.send(Ok(chunk)).await.is_ok(),
        LineEvent::Done(last) => {
            if let Some(chunk) = last {
                let _ = tx.send(Ok(chunk)).await;
            }
            false
        }
    }
}

/// Milliseconds since the Unix epoch
fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Seconds since the Unix epoch
fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
