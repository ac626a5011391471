//! Node Selection Policy
//!
//! Pure selection over a slice of node records. The registry runs it while
//! holding its lock, so the chosen node can be reserved in the same critical
//! section.
//!
//! # Order of Preference
//!
//! 1. Healthy nodes only, narrowed to those serving the requested model
//!    (the full healthy set when none does)
//! 2. Nodes with spare capacity; when there are none the least-loaded
//!    candidate is reported so the caller can queue
//! 3. Medium and complex requests go to a smart node, simple ones to the
//!    least-loaded primary node
//! 4. Otherwise among the nodes whose load is within 0.3 of the least
//!    loaded one: by tier, then fewest lifetime requests, then load

use std::cmp::Ordering;

use super::complexity::Complexity;
use super::node::{NodeState, NodeTier};

/// Load ratio difference that outranks tier preference
const LOAD_SPREAD: f64 = 0.3;

/// Outcome of a selection pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Dispatch to the node at this index
    Dispatch(usize),
    /// Every candidate is saturated; this one is the least loaded
    Saturated(usize),
    /// No node is healthy
    NoHealthy,
}

/// Pick a node for a request
#[must_use]
pub fn select(nodes: &[NodeState], model: Option<&str>, complexity: Complexity) -> Selection {
    let healthy: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].healthy).collect();
    if healthy.is_empty() {
        return Selection::NoHealthy;
    }

    let candidates = match model {
        Some(requested) => {
            let matching: Vec<usize> = healthy
                .iter()
                .copied()
                .filter(|&i| nodes[i].matching_model(requested).is_some())
                .collect();
            if matching.is_empty() {
                healthy
            } else {
                matching
            }
        }
        None => healthy,
    };

    let available: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| nodes[i].has_capacity())
        .collect();

    if available.is_empty() {
        return candidates
            .into_iter()
            .min_by(|&a, &b| by_load(&nodes[a], &nodes[b]))
            .map_or(Selection::NoHealthy, Selection::Saturated);
    }

    match complexity {
        Complexity::Complex | Complexity::Medium => {
            if let Some(&idx) = available.iter().find(|&&i| nodes[i].spec.tier == NodeTier::Smart) {
                return Selection::Dispatch(idx);
            }
        }
        Complexity::Simple => {
            let primary = available
                .iter()
                .copied()
                .filter(|&i| nodes[i].spec.tier == NodeTier::Primary)
                .min_by(|&a, &b| by_load(&nodes[a], &nodes[b]));
            if let Some(idx) = primary {
                return Selection::Dispatch(idx);
            }
        }
    }

    pick_generic(nodes, &available).map_or(Selection::NoHealthy, Selection::Dispatch)
}

/// First healthy node with spare capacity, other than `exclude`
#[must_use]
pub fn select_fallback(nodes: &[NodeState], exclude: &str) -> Option<usize> {
    nodes
        .iter()
        .position(|n| n.name() != exclude && n.is_available())
}

fn by_load(a: &NodeState, b: &NodeState) -> Ordering {
    a.load_ratio().total_cmp(&b.load_ratio())
}

/// Load band around the least-loaded node, then tier order inside it
///
/// Ties keep input order.
fn pick_generic(nodes: &[NodeState], available: &[usize]) -> Option<usize> {
    let floor = available
        .iter()
        .map(|&i| nodes[i].load_ratio())
        .min_by(f64::total_cmp)?;
    available
        .iter()
        .copied()
        .filter(|&i| nodes[i].load_ratio() - floor <= LOAD_SPREAD)
        .min_by(|&a, &b| tier_order(&nodes[a], &nodes[b]))
}

fn tier_order(a: &NodeState, b: &NodeState) -> Ordering {
    a.spec
        .tier
        .rank()
        .cmp(&b.spec.tier.rank())
        .then(a.total_requests.cmp(&b.total_requests))
        .then_with(|| by_load(a, b))
}
