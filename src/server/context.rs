// src/server/context.rs

use crate::config::AppInfo;
use crate::core::DeltaCacheError;
use crate::core::cache::Cache;
use crate::core::engine::{DeltaProxyCache, ObjectProxyCache};
use crate::core::origin::HttpOrigin;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Everything needed to serve one configured origin.
pub struct OriginRoute {
    pub http: Arc<HttpOrigin>,
    pub delta: DeltaProxyCache,
    pub object: ObjectProxyCache,
}

/// Shared state handed to every request handler.
pub struct ProxyState {
    pub app: AppInfo,
    pub caches: HashMap<String, Arc<dyn Cache>>,
    pub origins: HashMap<String, OriginRoute>,
}

impl ProxyState {
    pub fn route(&self, origin: &str) -> Result<&OriginRoute, DeltaCacheError> {
        self.origins
            .get(origin)
            .ok_or_else(|| DeltaCacheError::UnknownOrigin(origin.to_string()))
    }

    /// Closes every cache, stopping their reapers.
    pub async fn close_caches(&self) {
        for (name, cache) in &self.caches {
            match cache.close().await {
                Ok(()) => info!("Cache '{}' closed.", name),
                Err(e) => error!("Failed to close cache '{}': {}", name, e),
            }
        }
    }
}

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ProxyState>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub metrics_port: Option<u16>,
}
