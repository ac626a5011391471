//! Request Dispatcher
//!
//! The main entry point for routing a chat request onto the farm.
//! Coordinates the registry, the selection policy, the request queue and
//! the node clients.
//!
//! # Usage
//!
//! ```ignore
//! let dispatcher = Dispatcher::from_config(&config)?;
//! HealthMonitor::new(dispatcher.clone(), &config).tick().await;
//!
//! match dispatcher.dispatch(request).await? {
//!     DispatchOutcome::Complete(completion) => { /* JSON body */ }
//!     DispatchOutcome::Stream(stream) => { /* SSE body */ }
//! }
//! ```
//!
//! # Slot Accounting
//!
//! Every reserved slot is owned by a [`NodeLease`]. Dropping the lease gives
//! the slot back and drains the queue, whichever way the request ended,
//! including panics and caller disconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::complexity::{self, Complexity};
use super::policy;
use super::queue::{QueuedRequest, RequestQueue};
use super::registry::{Acquisition, NodeRegistry, NodeSlot};

use crate::backend::{
    self, ChatChunk, ChatCompletion, ChatRequest, ChunkReceiver, FarmMeta, NodeClient,
    UpstreamRequest,
};
use crate::config::FarmConfig;
use crate::error::{FarmError, FarmResult};
use crate::streaming::{strip_reasoning, StreamEvent, ThinkFilter};

/// Events buffered between the stream pump and the HTTP front
const EVENT_BUFFER: usize = 64;

// ============================================================================
// Settings
// ============================================================================

/// Dispatcher tuning
#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// Maximum number of waiting requests
    pub queue_capacity: usize,
    /// How long a request may wait for capacity
    pub queue_timeout: Duration,
    /// `max_tokens` sent when the caller gives none
    pub default_max_tokens: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            queue_timeout: Duration::from_secs(60),
            default_max_tokens: 1024,
        }
    }
}

impl DispatchSettings {
    /// Settings taken from the farm configuration
    #[must_use]
    pub fn from_config(config: &FarmConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            queue_timeout: config.queue_timeout,
            default_max_tokens: config.default_max_tokens,
        }
    }
}

// ============================================================================
// Lease
// ============================================================================

struct Shared {
    registry: Arc<NodeRegistry>,
    queue: Arc<RequestQueue<NodeLease>>,
}

impl Shared {
    /// Hand free capacity to queued requests, oldest first
    fn drain_queue(self: &Arc<Self>) {
        let served = self.queue.drain(|pending| {
            match self.registry.acquire_with(|nodes| {
                policy::select(nodes, pending.model.as_deref(), pending.complexity)
            }) {
                Acquisition::Granted(slot) => Some(NodeLease::new(Arc::clone(self), slot)),
                Acquisition::Saturated { .. } | Acquisition::NoHealthy => None,
            }
        });
        if served > 0 {
            debug!(served, queued = self.queue.len(), "queue drained");
        }
    }
}

/// Exclusive claim on one busy slot of a node
///
/// Released exactly once, on drop.
pub struct NodeLease {
    shared: Arc<Shared>,
    slot: NodeSlot,
    acquired_at: Instant,
}

impl NodeLease {
    fn new(shared: Arc<Shared>, slot: NodeSlot) -> Self {
        Self {
            shared,
            slot,
            acquired_at: Instant::now(),
        }
    }

    /// Name of the leased node
    #[must_use]
    pub fn node(&self) -> &str {
        self.slot.node()
    }

    /// Record success and return the elapsed time in milliseconds
    fn record_success(&self) -> u64 {
        let elapsed = self.acquired_at.elapsed();
        self.shared
            .registry
            .record_success(&self.slot, elapsed.as_secs_f64() * 1000.0);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    fn record_failure(&self) {
        self.shared.registry.record_failure(&self.slot);
    }
}

impl std::fmt::Debug for NodeLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLease")
            .field("node", &self.node())
            .finish_non_exhaustive()
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        self.shared.registry.release(&self.slot);
        self.shared.drain_queue();
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// A streamed response in flight
#[derive(Debug)]
pub struct FarmStream {
    /// Node serving the stream
    pub node: String,
    /// Whether the stream is served by the fallback node
    pub fallback: bool,
    /// Relayed events; the channel closes after `Done` or `Aborted`
    pub events: mpsc::Receiver<StreamEvent>,
}

/// Result of a dispatched request
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Complete response with routing metadata attached
    Complete(ChatCompletion),
    /// Streamed response
    Stream(FarmStream),
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes chat requests to farm nodes
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    clients: Arc<HashMap<String, Arc<dyn NodeClient>>>,
    settings: DispatchSettings,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("nodes", &self.shared.registry.names())
            .field("queued", &self.queued())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher over the given registry and clients
    ///
    /// Every registry node needs a client under the same name.
    #[must_use]
    pub fn new(
        registry: NodeRegistry,
        clients: HashMap<String, Arc<dyn NodeClient>>,
        settings: DispatchSettings,
    ) -> Self {
        let queue = Arc::new(RequestQueue::new(
            settings.queue_capacity,
            settings.queue_timeout,
        ));
        Self {
            shared: Arc::new(Shared {
                registry: Arc::new(registry),
                queue,
            }),
            clients: Arc::new(clients),
            settings,
        }
    }

    /// Dispatcher with HTTP clients for every configured node
    pub fn from_config(config: &FarmConfig) -> anyhow::Result<Self> {
        let http = backend::http_client()?;
        let clients = config
            .nodes
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    backend::connect(spec, http.clone(), config.request_timeout),
                )
            })
            .collect();
        Ok(Self::new(
            NodeRegistry::new(config.nodes.clone()),
            clients,
            DispatchSettings::from_config(config),
        ))
    }

    /// The node registry
    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.shared.registry
    }

    /// Client for a node
    #[must_use]
    pub fn client(&self, node: &str) -> Option<Arc<dyn NodeClient>> {
        self.clients.get(node).cloned()
    }

    /// Number of queued requests
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Dispatcher tuning
    #[must_use]
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Hand free capacity to queued requests
    pub fn drain_queue(&self) {
        self.shared.drain_queue();
    }

    /// Route one request, falling back once on an upstream failure
    pub async fn dispatch(&self, request: ChatRequest) -> FarmResult<DispatchOutcome> {
        let complexity = complexity::estimate(&request.messages);
        let lease = self.obtain(request.model.as_deref(), complexity).await?;
        let primary = lease.node().to_string();
        debug!(node = %primary, complexity = %complexity, stream = request.stream, "dispatching");

        let err = match self.attempt(lease, &request, false).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };

        let Some(slot) = self.shared.registry.acquire_fallback(&primary) else {
            warn!(node = %primary, error = %err, "node failed, no fallback available");
            return Err(err);
        };
        let backup = NodeLease::new(Arc::clone(&self.shared), slot);
        warn!(from = %primary, to = %backup.node(), error = %err, "node failed, falling back");

        self.attempt(backup, &request, true).await.map_err(|second| {
            warn!(first = %err, error = %second, "fallback failed");
            second
        })
    }

    /// Reserve a node directly, or wait in the queue for one
    async fn obtain(&self, model: Option<&str>, complexity: Complexity) -> FarmResult<NodeLease> {
        match self
            .shared
            .registry
            .acquire_with(|nodes| policy::select(nodes, model, complexity))
        {
            Acquisition::Granted(slot) => Ok(NodeLease::new(Arc::clone(&self.shared), slot)),
            Acquisition::NoHealthy => Err(FarmError::NoHealthyBackend),
            Acquisition::Saturated { candidate } => {
                let ticket = self
                    .shared
                    .queue
                    .enqueue(QueuedRequest::new(model.map(str::to_string), complexity))?;
                info!(
                    candidate = %candidate,
                    queued = self.shared.queue.len(),
                    "all nodes busy, request queued"
                );
                // Capacity may have freed up between selection and enqueue
                self.shared.drain_queue();
                ticket.wait().await
            }
        }
    }

    /// Run the request on the leased node
    ///
    /// On failure the node's error count is bumped and the lease released
    /// before returning.
    async fn attempt(
        &self,
        lease: NodeLease,
        request: &ChatRequest,
        fallback: bool,
    ) -> FarmResult<DispatchOutcome> {
        let Some(client) = self.client(lease.node()) else {
            lease.record_failure();
            return Err(FarmError::UpstreamTransport {
                node: lease.node().to_string(),
                message: "no client configured".to_string(),
            });
        };

        let upstream = UpstreamRequest {
            model: self
                .shared
                .registry
                .upstream_model(&lease.slot, request.model.as_deref()),
            messages: request.messages.clone(),
            max_tokens: request
                .max_tokens
                .filter(|&t| t > 0)
                .unwrap_or(self.settings.default_max_tokens),
        };

        if request.stream {
            match client.stream(&upstream).await {
                Ok(chunks) => {
                    let (tx, events) = mpsc::channel(EVENT_BUFFER);
                    let node = lease.node().to_string();
                    tokio::spawn(pump(lease, chunks, tx));
                    Ok(DispatchOutcome::Stream(FarmStream {
                        node,
                        fallback,
                        events,
                    }))
                }
                Err(err) => {
                    lease.record_failure();
                    Err(err)
                }
            }
        } else {
            match client.complete(&upstream).await {
                Ok(mut completion) => {
                    let latency_ms = lease.record_success();
                    for choice in &mut completion.choices {
                        if let Some(content) = choice.message.content.as_mut() {
                            *content = strip_reasoning(content);
                        }
                    }
                    completion.farm = Some(FarmMeta {
                        node: lease.node().to_string(),
                        latency_ms,
                        fallback,
                    });
                    debug!(node = %lease.node(), latency_ms, fallback, "request completed");
                    Ok(DispatchOutcome::Complete(completion))
                }
                Err(err) => {
                    lease.record_failure();
                    Err(err)
                }
            }
        }
    }
}

/// Relay upstream chunks through the reasoning filter
///
/// Owns the lease for the lifetime of the stream. Stops early when the
/// consumer goes away, which drops the upstream receiver and with it the
/// upstream connection.
async fn pump(lease: NodeLease, mut chunks: ChunkReceiver, tx: mpsc::Sender<StreamEvent>) {
    let mut filter = ThinkFilter::new();
    // Id, model and timestamp of the upstream stream, for the flushed tail
    let mut identity: Option<(String, String, i64)> = None;

    loop {
        let item = tokio::select! {
            () = tx.closed() => {
                debug!(node = %lease.node(), "caller disconnected mid-stream");
                return;
            }
            item = chunks.recv() => item,
        };

        match item {
            None => break,
            Some(Ok(mut chunk)) => {
                if identity.is_none() {
                    identity = Some((chunk.id.clone(), chunk.model.clone(), chunk.created));
                }
                let had_content = chunk.content().is_some();
                let mut text = chunk.content().map(|c| filter.push(c)).unwrap_or_default();
                if chunk.finish_reason().is_some() {
                    text.push_str(&filter.finish());
                }

                if had_content || !text.is_empty() {
                    if text.is_empty() && chunk.finish_reason().is_none() {
                        continue;
                    }
                    chunk.set_content((!text.is_empty()).then_some(text));
                }

                if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                    return;
                }
            }
            Some(Err(err)) => {
                lease.record_failure();
                warn!(node = %lease.node(), error = %err, "upstream stream aborted");
                let _ = tx
                    .send(StreamEvent::Aborted(FarmError::StreamAborted {
                        node: lease.node().to_string(),
                        message: err.to_string(),
                    }))
                    .await;
                return;
            }
        }
    }

    let tail = filter.finish();
    if !tail.is_empty() {
        let (id, model, created) = identity.unwrap_or_else(|| {
            let now = chrono::Utc::now();
            (
                format!("chatcmpl-farm-{}", now.timestamp_millis()),
                lease.node().to_string(),
                now.timestamp(),
            )
        });
        let tail_chunk = ChatChunk::delta(id, model, created, Some(tail), None);
        if tx.send(StreamEvent::Chunk(tail_chunk)).await.is_err() {
            return;
        }
    }

    let latency_ms = lease.record_success();
    debug!(node = %lease.node(), latency_ms, "stream completed");
    let _ = tx.send(StreamEvent::Done).await;
}
