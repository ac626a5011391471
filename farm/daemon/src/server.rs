//! Daemon Server Implementation
//!
//! Startup order matters:
//!
//! 1. one full probing round, so the first request sees real node health
//! 2. the periodic health monitor
//! 3. the listener
//!
//! On SIGINT/SIGTERM the listener stops accepting, in-flight requests are
//! allowed to finish, then the monitor is stopped.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use farm_core::{create_router, AppState, Dispatcher, FarmConfig, HealthMonitor};

/// The farm router process
pub struct FarmServer {
    config: FarmConfig,
    dispatcher: Dispatcher,
}

impl FarmServer {
    /// Build clients and state for every configured node
    pub fn new(config: FarmConfig) -> Result<Self> {
        let dispatcher =
            Dispatcher::from_config(&config).context("Failed to build node clients")?;
        Ok(Self { config, dispatcher })
    }

    /// Serve until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let monitor = HealthMonitor::new(self.dispatcher.clone(), &self.config);
        let report = monitor.tick().await;
        info!(healthy = report.healthy, total = report.total, "Initial health check complete");

        let handle = monitor.spawn();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?;

        self.log_banner(&listener);

        let app = create_router(AppState::new(self.dispatcher.clone()));
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed");

        info!("Shutting down...");
        handle.stop().await;
        served
    }

    fn log_banner(&self, listener: &TcpListener) {
        let local = listener
            .local_addr()
            .map_or_else(|_| format!("port {}", self.config.port), |a| a.to_string());
        info!(address = %local, "Neural farm listening");
        info!("  POST /v1/chat/completions  (OpenAI-compatible)");
        info!("  GET  /v1/models");
        info!("  GET  /health");

        for node in self.dispatcher.registry().snapshot() {
            info!(
                node = %node.name(),
                url = %node.spec.base_url(),
                protocol = ?node.spec.protocol,
                tier = %node.spec.tier,
                parallel = node.spec.parallel,
                healthy = node.healthy,
                "farm node"
            );
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}
