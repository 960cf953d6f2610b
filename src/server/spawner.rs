// src/server/spawner.rs

//! Spawns the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use tracing::info;

/// Spawns background tasks into the context's JoinSet.
///
/// Cache reapers are owned by their caches and started by `connect()`.
pub fn spawn_all(ctx: &mut ServerContext) {
    match ctx.metrics_port {
        Some(port) => {
            let shutdown_rx_metrics = ctx.shutdown_tx.subscribe();
            ctx.background_tasks.spawn(async move {
                metrics_server::run_metrics_server(port, shutdown_rx_metrics).await;
                Ok(())
            });
        }
        None => info!("Prometheus metrics server is disabled in the configuration."),
    }
}
