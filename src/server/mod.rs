// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod stream;

pub use context::ServerContext;
pub use stream::Transport;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize server state, listener, TLS, pool, and cache.
    let ctx = initialization::setup(config).await?;

    // 2. Start the main connection acceptance loop. Runs until shutdown.
    connection_loop::run(ctx).await;

    Ok(())
}
