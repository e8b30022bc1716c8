//! kiln-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from CLI flags, an optional config file, and the
//!    environment.
//! 2. Initialise structured tracing.
//! 3. Load the model and spin up the worker pool.
//! 4. Build the Axum router (HTTP + the `/mcp` control protocol).
//! 5. Serve with graceful shutdown on SIGINT/SIGTERM.

mod config;
mod control;
mod error;
mod lifecycle;
mod logging;
mod middleware;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::config::{CliArgs, ServerConfig};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load(CliArgs::parse())?;
    logging::init(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "kiln-server starting");

    let pool_config: kiln_core::PoolConfig = (&config).into();
    let pool = kiln_core::Pool::initialize(pool_config).await?;
    info!(workers = config.workers, "worker pool ready");

    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&pool), Arc::clone(&config));

    let app = routes::build(state);
    let addr: SocketAddr = config.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(lifecycle::shutdown_signal())
        .await?;

    let clean = lifecycle::drain_and_close(&pool).await;
    if !clean {
        // §4.7/§6.4: a drain timeout or a pool error while closing is a
        // fatal shutdown condition, not a clean exit — surfaced as exit
        // code 1 rather than swallowed into a normal `Ok(())` return.
        anyhow::bail!("shutdown did not complete cleanly; see prior warnings");
    }

    info!("kiln-server stopped");
    Ok(())
}
