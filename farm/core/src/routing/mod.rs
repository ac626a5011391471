//! Farm Routing
//!
//! Decides which node serves each request and keeps the per-node state
//! that decision depends on.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                            │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────────────────┐ │
//! │  │ Complexity │  │   Policy   │  │      Request Queue       │ │
//! │  │ Estimator  │─▶│ (select)   │  │  FIFO, bounded, timeout  │ │
//! │  └────────────┘  └─────┬──────┘  └────────────┬─────────────┘ │
//! │                        │ under lock           │ drain         │
//! │                  ┌─────▼──────────────────────▼─────┐         │
//! │                  │          Node Registry           │◀── Health│
//! │                  │  busy / healthy / counters       │   Monitor│
//! │                  └──────────────────────────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: routes a request, with one fallback on upstream failure
//! - [`NodeRegistry`]: shared node records, selection and reservation
//! - [`HealthMonitor`]: periodic concurrent probing
//! - [`RequestQueue`]: callers waiting for capacity

pub mod complexity;
pub mod health;
pub mod node;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod router;

#[cfg(test)]
pub mod test_utils;

pub use complexity::{estimate, Complexity};
pub use health::{HealthMonitor, MonitorHandle, TickReport};
pub use node::{model_matches, normalize_model_id, NodeSpec, NodeState, NodeTier, Protocol};
pub use policy::{select, select_fallback, Selection};
pub use queue::{QueueTicket, QueuedRequest, RequestQueue};
pub use registry::{Acquisition, HealthTransition, NodeRegistry, NodeSlot};
pub use router::{DispatchOutcome, DispatchSettings, Dispatcher, FarmStream, NodeLease};
