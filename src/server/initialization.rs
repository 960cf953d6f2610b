// src/server/initialization.rs

//! Builds caches, origins and engines from the configuration and binds the listener.

use super::context::{OriginRoute, ProxyState, ServerContext};
use crate::config::Config;
use crate::core::cache::{Cache, new_cache};
use crate::core::engine::{DeltaProxyCache, ObjectProxyCache};
use crate::core::origin::{HttpOrigin, Origin};
use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    if config.origins.is_empty() {
        return Err(anyhow!("no origins configured; add at least one [origins.<name>] section"));
    }
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = build_state(&config).await?;
    info!(
        "Proxy state initialized with {} cache(s) and {} origin(s).",
        state.caches.len(),
        state.origins.len()
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("{} listening on {}:{}", state.app, config.host, config.port);

    Ok(ServerContext {
        state: Arc::new(state),
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        metrics_port: config.metrics.enabled.then_some(config.metrics.port),
    })
}

/// Connects every configured cache and wires each origin to its cache.
pub async fn build_state(config: &Config) -> Result<ProxyState> {
    let app = config.app_info();

    let mut caches: HashMap<String, Arc<dyn Cache>> = HashMap::new();
    for (name, cache_config) in &config.caches {
        let cache = new_cache(cache_config.clone());
        cache
            .connect()
            .await
            .with_context(|| format!("Failed to connect cache '{name}'"))?;
        info!("Cache '{}' ({}) connected.", name, cache_config.cache_type);
        caches.insert(name.clone(), cache);
    }

    let mut origins = HashMap::new();
    for (name, origin_config) in &config.origins {
        let cache = caches.get(&origin_config.cache_name).cloned().ok_or_else(|| {
            anyhow!(
                "origin '{name}' references unknown cache '{}'",
                origin_config.cache_name
            )
        })?;
        let http = Arc::new(
            HttpOrigin::new(origin_config.clone(), app.clone())
                .with_context(|| format!("Failed to build origin '{name}'"))?,
        );
        let origin: Arc<dyn Origin> = http.clone();
        info!(
            "Origin '{}' -> {} (cache '{}')",
            name, origin_config.origin_url, origin_config.cache_name
        );
        origins.insert(
            name.clone(),
            OriginRoute {
                http,
                delta: DeltaProxyCache::new(Arc::clone(&cache), Arc::clone(&origin)),
                object: ObjectProxyCache::new(cache, origin),
            },
        );
    }

    Ok(ProxyState {
        app,
        caches,
        origins,
    })
}

fn log_startup_info(config: &Config) {
    info!(
        "Starting {} version {}",
        config.app_name,
        env!("CARGO_PKG_VERSION")
    );
    if config.metrics.enabled {
        info!("Prometheus metrics enabled on port {}", config.metrics.port);
    }
}
