//! Farm Core - Load Balancing for a Heterogeneous LLM Farm
//!
//! This crate routes OpenAI-style chat requests across a small farm of
//! inference nodes (laptops, phones, single-board machines) that each run a
//! local model server. It knows which nodes are alive, how busy they are and
//! which models they serve, and picks one per request.
//!
//! # Architecture
//!
//! ```text
//!             caller (OpenAI-compatible client)
//!                          │
//! ┌────────────────────────┼──────────────────────────────────────┐
//! │                   HTTP Front (axum)                            │
//! │                        │                                       │
//! │                   Dispatcher ──────────── Request Queue        │
//! │        ┌───────────────┼───────────────┐                       │
//! │   Complexity       Selector         Node Registry ◀── Health   │
//! │   Estimator       (policy)          (busy, counters)  Monitor  │
//! │                        │                                       │
//! │                 Backend Clients ──▶ Think Filter (streams)     │
//! └────────────────────────┼──────────────────────────────────────┘
//!                          │
//!          ┌───────────────┼───────────────┐
//!       openai          openai        simple-chat
//!       (mac)          (pixel)         (iphone)
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: routes a request, queues it under saturation, falls back once
//! - [`NodeRegistry`]: live per-node state shared by every component
//! - [`HealthMonitor`]: periodic concurrent probing
//! - [`NodeClient`]: one node's wire protocol
//! - [`FarmConfig`]: everything read at startup
//!
//! # Module Overview
//!
//! - [`api`]: OpenAI-compatible HTTP surface
//! - [`backend`]: `openai` and `simple-chat` node clients
//! - [`config`]: TOML, environment and CLI configuration
//! - [`error`]: error taxonomy and HTTP status mapping
//! - [`routing`]: registry, selection, queue, dispatcher, health monitor
//! - [`streaming`]: line reassembly and reasoning-span stripping

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod routing;
pub mod streaming;

// Re-exports for convenience
pub use api::{create_router, AppState};
pub use backend::{
    ChatChunk, ChatCompletion, ChatMessage, ChatRequest, FarmMeta, MessageContent, NodeClient,
    UpstreamRequest,
};
pub use error::{FarmError, FarmResult};
pub use routing::{
    Complexity, DispatchOutcome, DispatchSettings, Dispatcher, FarmStream, HealthMonitor,
    MonitorHandle, NodeRegistry, NodeSpec, NodeState, NodeTier, Protocol, TickReport,
};
pub use streaming::{strip_reasoning, StreamEvent, ThinkFilter};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, FarmConfig, FarmToml,
};
