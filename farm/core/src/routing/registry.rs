//! Node Registry
//!
//! Owns every [`NodeState`] behind a single mutex. The health monitor and the
//! dispatcher mutate the same records concurrently; every mutation goes
//! through a method here and holds the lock only for in-memory updates.
//!
//! Selection and reservation happen in one critical section
//! ([`NodeRegistry::acquire_with`]), so two concurrent requests can never both
//! claim a node's last free slot.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;

use super::node::{NodeSpec, NodeState};
use super::policy::{self, Selection};
use crate::error::FarmResult;

/// A reserved slot on one node
///
/// Only the registry creates slots; each one must be handed back through
/// [`NodeRegistry::release`] exactly once.
#[derive(Debug)]
pub struct NodeSlot {
    index: usize,
    name: String,
}

impl NodeSlot {
    /// Name of the reserved node
    #[must_use]
    pub fn node(&self) -> &str {
        &self.name
    }
}

/// Result of trying to reserve a node
#[derive(Debug)]
pub enum Acquisition {
    /// A slot was reserved
    Granted(NodeSlot),
    /// Every candidate is saturated
    Saturated {
        /// Least-loaded candidate
        candidate: String,
    },
    /// No node is healthy
    NoHealthy,
}

/// Health change caused by a probe result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthTransition {
    /// Unhealthy to healthy
    CameUp,
    /// Healthy to unhealthy
    WentDown,
    /// No change
    Unchanged,
}

/// Shared collection of node records
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: Mutex<Vec<NodeState>>,
    started_at: Instant,
}

impl NodeRegistry {
    /// Registry with every node initially unhealthy
    #[must_use]
    pub fn new(specs: Vec<NodeSpec>) -> Self {
        Self {
            nodes: Mutex::new(specs.into_iter().map(NodeState::new).collect()),
            started_at: Instant::now(),
        }
    }

    /// When the registry was created
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Number of configured nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Whether no node is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Copy of every node record
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeState> {
        self.nodes.lock().clone()
    }

    /// Copy of one node record
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NodeState> {
        self.nodes.lock().iter().find(|n| n.name() == name).cloned()
    }

    /// Names of every configured node
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.nodes.lock().iter().map(|n| n.name().to_string()).collect()
    }

    /// Number of healthy nodes
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.nodes.lock().iter().filter(|n| n.healthy).count()
    }

    /// Run a selection and reserve the chosen node in one step
    ///
    /// On [`Selection::Dispatch`] the node's `busy` and `total_requests` are
    /// incremented before the lock is released.
    pub fn acquire_with<F>(&self, select: F) -> Acquisition
    where
        F: FnOnce(&[NodeState]) -> Selection,
    {
        let mut nodes = self.nodes.lock();
        match select(&nodes) {
            Selection::Dispatch(index) => Acquisition::Granted(reserve(&mut nodes, index)),
            Selection::Saturated(index) => Acquisition::Saturated {
                candidate: nodes[index].name().to_string(),
            },
            Selection::NoHealthy => Acquisition::NoHealthy,
        }
    }

    /// Reserve the first healthy node with spare capacity other than `exclude`
    pub fn acquire_fallback(&self, exclude: &str) -> Option<NodeSlot> {
        let mut nodes = self.nodes.lock();
        policy::select_fallback(&nodes, exclude).map(|index| reserve(&mut nodes, index))
    }

    /// Hand a reserved slot back
    pub fn release(&self, slot: &NodeSlot) {
        let mut nodes = self.nodes.lock();
        let node = &mut nodes[slot.index];
        if node.busy == 0 {
            warn!(node = %slot.name, "release without a matching reservation");
            return;
        }
        node.busy -= 1;
    }

    /// Record a successful request and its latency
    pub fn record_success(&self, slot: &NodeSlot, elapsed_ms: f64) {
        self.nodes.lock()[slot.index].record_latency(elapsed_ms);
    }

    /// Record a failed request
    pub fn record_failure(&self, slot: &NodeSlot) {
        self.nodes.lock()[slot.index].total_errors += 1;
    }

    /// Model id to send upstream for a request on this node
    ///
    /// The advertised model matching `requested`, else the first advertised
    /// model, else `None`.
    #[must_use]
    pub fn upstream_model(&self, slot: &NodeSlot, requested: Option<&str>) -> Option<String> {
        let nodes = self.nodes.lock();
        let node = &nodes[slot.index];
        requested
            .and_then(|r| node.matching_model(r))
            .or_else(|| node.models.first().map(String::as_str))
            .map(str::to_string)
    }

    /// Apply one probe result to a node
    ///
    /// `Ok(Some(models))` replaces the model list, `Ok(None)` keeps it.
    pub fn apply_probe(
        &self,
        name: &str,
        result: FarmResult<Option<Vec<String>>>,
    ) -> HealthTransition {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.iter_mut().find(|n| n.name() == name) else {
            return HealthTransition::Unchanged;
        };

        let was_healthy = node.healthy;
        node.last_check = Some(Instant::now());
        match result {
            Ok(models) => {
                node.healthy = true;
                if let Some(models) = models {
                    node.models = models;
                }
            }
            Err(_) => node.healthy = false,
        }

        match (was_healthy, node.healthy) {
            (false, true) => {
                node.up_since = Some(Instant::now());
                HealthTransition::CameUp
            }
            (true, false) => {
                node.up_since = None;
                HealthTransition::WentDown
            }
            _ => HealthTransition::Unchanged,
        }
    }
}

fn reserve(nodes: &mut [NodeState], index: usize) -> NodeSlot {
    let node = &mut nodes[index];
    node.busy += 1;
    node.total_requests += 1;
    NodeSlot {
        index,
        name: node.name().to_string(),
    }
}
