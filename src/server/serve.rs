// src/server/serve.rs

//! Runs the HTTP front end until a shutdown signal, then winds everything down.

use super::context::ServerContext;
use super::routes;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

/// The main server loop: serves requests and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    let app = routes::router(ctx.state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();
    let mut http_shutdown_rx = ctx.shutdown_tx.subscribe();
    let mut http_task = tokio::spawn(
        axum::serve(ctx.listener, app)
            .with_graceful_shutdown(async move {
                http_shutdown_rx.recv().await.ok();
                info!("HTTP front end shutting down.");
            })
            .into_future(),
    );
    let mut http_finished = false;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            res = &mut http_task => {
                http_finished = true;
                match res {
                    Ok(Ok(())) => warn!("HTTP front end stopped unexpectedly."),
                    Ok(Err(e)) => error!("CRITICAL: HTTP front end failed: {}. Shutting down.", e),
                    Err(e) => error!("CRITICAL: HTTP front end panicked: {e:?}. Shutting down."),
                }
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            }
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    if !http_finished {
        match http_task.await {
            Ok(Ok(())) => info!("All client connections closed."),
            Ok(Err(e)) => error!("HTTP front end finished with error: {}", e),
            Err(e) => error!("HTTP front end task failed: {e:?}"),
        }
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };

    ctx.state.close_caches().await;
    info!("Server shutdown complete.");
    Ok(())
}
