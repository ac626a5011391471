//! Farm Node Records
//!
//! A [`NodeSpec`] is the static description of one inference backend, read
//! once from configuration. A [`NodeState`] wraps it with the live fields the
//! health monitor and the dispatcher keep up to date.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ============================================================================
// Tier / Protocol
// ============================================================================

/// Coarse capability class of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeTier {
    /// Strongest node, preferred for medium and complex requests
    Smart,
    /// Fast node, preferred for simple requests
    #[default]
    Primary,
    /// Overflow capacity
    Secondary,
}

impl NodeTier {
    /// Ordering used as a tiebreak: primary < smart < secondary
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Smart => 1,
            Self::Secondary => 2,
        }
    }

    /// Wire name of the tier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Smart => "smart",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for NodeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol family spoken by a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Protocol {
    /// OpenAI-style `/v1/chat/completions` with SSE streaming
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// `/api/chat` with newline-delimited JSON streaming
    #[serde(rename = "simple-chat")]
    SimpleChat,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::SimpleChat => write!(f, "simple-chat"),
        }
    }
}

// ============================================================================
// Node Spec
// ============================================================================

fn default_parallel() -> u32 {
    1
}

/// Static configuration of one node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node name
    pub name: String,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Protocol family
    #[serde(default)]
    pub protocol: Protocol,
    /// Capability tier
    #[serde(default)]
    pub tier: NodeTier,
    /// Concurrency limit
    #[serde(default = "default_parallel")]
    pub parallel: u32,
}

impl NodeSpec {
    /// Create a spec with a concurrency limit of one
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        protocol: Protocol,
        tier: NodeTier,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            protocol,
            tier,
            parallel: 1,
        }
    }

    /// Set the concurrency limit
    #[must_use]
    pub fn with_parallel(mut self, parallel: u32) -> Self {
        self.parallel = parallel;
        self
    }

    /// Base URL of the node
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Node State
// ============================================================================

/// Live record of one node
#[derive(Clone, Debug)]
pub struct NodeState {
    /// Static configuration
    pub spec: NodeSpec,
    /// Requests currently in flight
    pub busy: u32,
    /// Result of the latest probe
    pub healthy: bool,
    /// When the latest probe finished
    pub last_check: Option<Instant>,
    /// When the node last came up (None while down)
    pub up_since: Option<Instant>,
    /// Model ids advertised by the node, normalized
    pub models: Vec<String>,
    /// Requests dispatched to the node
    pub total_requests: u64,
    /// Requests that failed on the node
    pub total_errors: u64,
    /// Exponential moving average of successful request latency
    pub avg_latency_ms: f64,
    /// Number of latency samples folded into the average
    pub latency_samples: u64,
}

impl NodeState {
    /// Fresh record for a node that has never been probed
    #[must_use]
    pub fn new(spec: NodeSpec) -> Self {
        Self {
            spec,
            busy: 0,
            healthy: false,
            last_check: None,
            up_since: None,
            models: Vec::new(),
            total_requests: 0,
            total_errors: 0,
            avg_latency_ms: 0.0,
            latency_samples: 0,
        }
    }

    /// Node name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Busy slots over the concurrency limit
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        f64::from(self.busy) / f64::from(self.spec.parallel.max(1))
    }

    /// Whether another request fits under the concurrency limit
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.busy < self.spec.parallel
    }

    /// Healthy and with spare capacity
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.healthy && self.has_capacity()
    }

    /// The advertised model that fuzzy-matches `requested`, if any
    #[must_use]
    pub fn matching_model(&self, requested: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|m| model_matches(m, requested))
            .map(String::as_str)
    }

    /// Time since the node came up
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.up_since.map(|t| t.elapsed())
    }

    /// Fold one successful request latency into the moving average
    pub fn record_latency(&mut self, elapsed_ms: f64) {
        self.avg_latency_ms = if self.latency_samples == 0 {
            elapsed_ms
        } else {
            self.avg_latency_ms * 0.8 + elapsed_ms * 0.2
        };
        self.latency_samples += 1;
    }
}

// ============================================================================
// Model Id Normalization
// ============================================================================

/// Strip the `.gguf` extension and a `-Q<digit>...` quantization suffix
///
/// `Qwen3-8B-Q4_K_M.gguf` becomes `Qwen3-8B`.
#[must_use]
pub fn normalize_model_id(id: &str) -> String {
    let id = id.replacen(".gguf", "", 1);
    strip_quantization(&id, false).to_string()
}

/// Fuzzy model match: substring in either direction after normalization
#[must_use]
pub fn model_matches(advertised: &str, requested: &str) -> bool {
    let advertised = fold(advertised);
    let requested = fold(requested);
    if advertised.is_empty() || requested.is_empty() {
        return false;
    }
    advertised.contains(&requested) || requested.contains(&advertised)
}

fn fold(id: &str) -> String {
    let lower = id.to_lowercase().replacen(".gguf", "", 1);
    strip_quantization(&lower, true).to_string()
}

fn strip_quantization(id: &str, ignore_case: bool) -> &str {
    let bytes = id.as_bytes();
    for idx in 0..bytes.len().saturating_sub(2) {
        let q = bytes[idx + 1];
        let is_q = q == b'Q' || (ignore_case && q == b'q');
        if bytes[idx] == b'-' && is_q && bytes[idx + 2].is_ascii_digit() {
            return &id[..idx];
        }
    }
    id
}
