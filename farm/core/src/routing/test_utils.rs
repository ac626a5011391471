//! Farm Test Utilities
//!
//! Provides a scriptable [`MockNodeClient`] for exercising the dispatcher
//! and the health monitor without sockets. Each mock replays one
//! [`MockReply`], records the requests it received, and can be gated so a
//! test decides when in-flight requests finish.
//!
//! # Usage
//!
//! ```ignore
//! let mac = MockNodeClient::new("mac", MockReply::transport_error("mac"));
//! let pixel = MockNodeClient::new("pixel", MockReply::text("ok"));
//! let dispatcher = farm(vec![(mac_spec, mac.clone()), (pixel_spec, pixel)], settings).await;
//!
//! dispatcher.dispatch(request).await?;
//! assert_eq!(mac.calls(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use super::registry::NodeRegistry;
use super::router::{DispatchSettings, Dispatcher};
use super::NodeSpec;
use crate::backend::{ChatChunk, ChatCompletion, ChunkReceiver, NodeClient, UpstreamRequest};
use crate::error::{FarmError, FarmResult};

// ============================================================================
// Replies
// ============================================================================

/// What a mock node answers with
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Complete text, also streamed as a single chunk
    Text(String),
    /// Fail before any output
    Fail(FarmError),
    /// Stream these fragments, then end
    Stream(Vec<String>),
    /// Stream these fragments, then break the stream
    StreamThenFail(Vec<String>, FarmError),
    /// Stream forever until the receiver goes away
    Endless,
}

impl MockReply {
    /// Complete text reply
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Connection failure
    pub fn transport_error(node: &str) -> Self {
        Self::Fail(FarmError::UpstreamTransport {
            node: node.to_string(),
            message: "connection refused".to_string(),
        })
    }

    /// Non-2xx response
    pub fn http_error(node: &str, status: u16) -> Self {
        Self::Fail(FarmError::upstream_http(node, status, "upstream exploded"))
    }

    /// Streamed fragments
    pub fn stream(fragments: &[&str]) -> Self {
        Self::Stream(fragments.iter().map(|f| (*f).to_string()).collect())
    }

    /// Streamed fragments followed by a transport failure
    pub fn stream_then_fail(fragments: &[&str], node: &str) -> Self {
        Self::StreamThenFail(
            fragments.iter().map(|f| (*f).to_string()).collect(),
            FarmError::UpstreamTransport {
                node: node.to_string(),
                message: "connection reset".to_string(),
            },
        )
    }

    /// Never-ending stream
    pub fn endless_stream() -> Self {
        Self::Endless
    }
}

// ============================================================================
// Mock Client
// ============================================================================

/// Scriptable in-memory node
pub struct MockNodeClient {
    name: String,
    reply: Mutex<MockReply>,
    probe_ok: AtomicBool,
    probe_delay: Mutex<Option<Duration>>,
    gated: AtomicBool,
    gate: Semaphore,
    calls: AtomicUsize,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl MockNodeClient {
    /// Mock that answers every request with `reply`
    pub fn new(name: &str, reply: MockReply) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Mutex::new(reply),
            probe_ok: AtomicBool::new(true),
            probe_delay: Mutex::new(None),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Hold every request until [`MockNodeClient::release`] lets it through
    pub fn gated(self: Arc<Self>) -> Arc<Self> {
        self.gated.store(true, Ordering::SeqCst);
        self
    }

    /// Let `n` held requests finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Make probes succeed or fail
    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    /// Make probes take this long before answering
    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock() = Some(delay);
    }

    /// Number of complete/stream calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().clone()
    }

    /// Wait until at least `n` calls arrived
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("mock node never received the expected calls");
    }

    async fn enter(&self, request: &UpstreamRequest) -> MockReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await.expect("gate closed").forget();
        }
        self.reply.lock().clone()
    }

    fn chunk(&self, text: &str) -> ChatChunk {
        ChatChunk::delta("mock-stream", &self.name, 0, Some(text.to_string()), None)
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    fn node(&self) -> &str {
        &self.name
    }

    async fn probe(&self, _timeout: Duration) -> FarmResult<Option<Vec<String>>> {
        let delay = *self.probe_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(Some(vec![format!("{}-model", self.name)]))
        } else {
            Err(FarmError::Probe {
                node: self.name.clone(),
                reason: "mock probe failure".to_string(),
            })
        }
    }

    async fn complete(&self, request: &UpstreamRequest) -> FarmResult<ChatCompletion> {
        let text = match self.enter(request).await {
            MockReply::Fail(err) | MockReply::StreamThenFail(_, err) => return Err(err),
            MockReply::Text(text) => text,
            MockReply::Stream(fragments) => fragments.concat(),
            MockReply::Endless => String::new(),
        };
        Ok(ChatCompletion::text("mock", &self.name, 0, text, "stop"))
    }

    async fn stream(&self, request: &UpstreamRequest) -> FarmResult<ChunkReceiver> {
        let (fragments, failure, endless) = match self.enter(request).await {
            MockReply::Fail(err) => return Err(err),
            MockReply::Text(text) => (vec![text], None, false),
            MockReply::Stream(fragments) => (fragments, None, false),
            MockReply::StreamThenFail(fragments, err) => (fragments, Some(err), false),
            MockReply::Endless => (Vec::new(), None, true),
        };

        let (tx, rx) = mpsc::channel(16);
        let chunks: Vec<ChatChunk> = fragments.iter().map(|f| self.chunk(f)).collect();
        let tick = self.chunk("tick");
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(err) = failure {
                let _ = tx.send(Err(err)).await;
                return;
            }
            while endless {
                if tx.send(Ok(tick.clone())).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        Ok(rx)
    }
}

// ============================================================================
// Farm Builder
// ============================================================================

/// Dispatcher over mock nodes, each probed once
pub async fn farm(
    nodes: Vec<(NodeSpec, Arc<MockNodeClient>)>,
    settings: DispatchSettings,
) -> Dispatcher {
    let registry = NodeRegistry::new(nodes.iter().map(|(spec, _)| spec.clone()).collect());
    for (spec, client) in &nodes {
        registry.apply_probe(&spec.name, client.probe(Duration::from_secs(1)).await);
    }

    let clients: HashMap<String, Arc<dyn NodeClient>> = nodes
        .into_iter()
        .map(|(spec, client)| (spec.name, client as Arc<dyn NodeClient>))
        .collect();
    Dispatcher::new(registry, clients, settings)
}
