//! Node Health Monitoring
//!
//! Periodically probes every node and folds the results into the registry.
//!
//! # Probing
//!
//! All probes of a tick run concurrently, each bounded by its own timeout,
//! so one hung node never delays the verdict on another. A failed, slow or
//! malformed probe only marks its node unhealthy.
//!
//! # Lifecycle
//!
//! [`HealthMonitor::tick`] runs a single round and can be driven directly by
//! tests. [`HealthMonitor::spawn`] runs rounds on an interval until the
//! returned [`MonitorHandle`] is stopped.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::HealthTransition;
use super::router::Dispatcher;
use crate::config::FarmConfig;
use crate::error::FarmError;

/// Result of one probing round
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Healthy nodes after the round
    pub healthy: usize,
    /// Configured nodes
    pub total: usize,
    /// Nodes whose health changed, in registry order
    pub transitions: Vec<(String, HealthTransition)>,
}

/// Periodic prober for every farm node
#[derive(Clone, Debug)]
pub struct HealthMonitor {
    dispatcher: Dispatcher,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Monitor using the configured interval and probe timeout
    #[must_use]
    pub fn new(dispatcher: Dispatcher, config: &FarmConfig) -> Self {
        Self::with_timing(dispatcher, config.health_interval, config.probe_timeout)
    }

    /// Monitor with explicit timing
    #[must_use]
    pub fn with_timing(dispatcher: Dispatcher, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            dispatcher,
            interval,
            probe_timeout,
        }
    }

    /// Probe every node once
    pub async fn tick(&self) -> TickReport {
        let registry = self.dispatcher.registry();
        let names = registry.names();

        let probes = names.iter().map(|name| async move {
            let Some(client) = self.dispatcher.client(name) else {
                return Err(FarmError::Probe {
                    node: name.clone(),
                    reason: "no client configured".to_string(),
                });
            };
            // Clients bound each HTTP call; this bounds the whole probe
            let limit = self.probe_timeout.saturating_mul(2);
            match tokio::time::timeout(limit, client.probe(self.probe_timeout)).await {
                Ok(result) => result,
                Err(_) => Err(FarmError::Probe {
                    node: name.clone(),
                    reason: "probe timed out".to_string(),
                }),
            }
        });
        let results = join_all(probes).await;

        let mut transitions = Vec::new();
        for (name, result) in names.iter().zip(results) {
            if let Err(err) = &result {
                debug!(node = %name, error = %err, "probe failed");
            }
            let transition = registry.apply_probe(name, result);
            match transition {
                HealthTransition::CameUp => {
                    let models = registry.get(name).map(|n| n.models.join(", ")).unwrap_or_default();
                    info!(node = %name, models = %models, "node came UP");
                }
                HealthTransition::WentDown => warn!(node = %name, "node went DOWN"),
                HealthTransition::Unchanged => {}
            }
            if transition != HealthTransition::Unchanged {
                transitions.push((name.clone(), transition));
            }
        }

        let snapshot = registry.snapshot();
        let summary: Vec<String> = snapshot
            .iter()
            .map(|n| {
                let status = if n.healthy { "OK" } else { "DOWN" };
                format!("{}:{status}[{}m]", n.name(), n.models.len())
            })
            .collect();
        debug!(nodes = %summary.join(" "), "health check");

        // Nodes that came up may unblock queued requests
        self.dispatcher.drain_queue();

        TickReport {
            healthy: snapshot.iter().filter(|n| n.healthy).count(),
            total: snapshot.len(),
            transitions,
        }
    }

    /// Run a round every interval until stopped
    ///
    /// The first round runs one interval from now; callers wanting an
    /// immediate verdict run [`HealthMonitor::tick`] first.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!(
                interval_ms = self.interval.as_millis() as u64,
                probe_timeout_ms = self.probe_timeout.as_millis() as u64,
                "starting health monitor"
            );

            let start = tokio::time::Instant::now() + self.interval;
            let mut interval = tokio::time::interval_at(start, self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        info!("health monitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        });

        MonitorHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Owner of a running health monitor
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for the current round to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "health monitor task failed");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
