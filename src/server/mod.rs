// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod context;
mod initialization;
mod metrics_server;
pub mod routes;
mod serve;
mod spawner;

pub use context::{OriginRoute, ProxyState};
pub use initialization::build_state;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Connect caches, build origins and engines, bind the listener.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Serve until shutdown.
    serve::run(server_context).await
}
