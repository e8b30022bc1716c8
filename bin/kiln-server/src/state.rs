//! Shared application state injected into every Axum handler and the
//! control-protocol session loop.

use std::sync::Arc;
use std::time::Instant;

use kiln_core::Pool;

use crate::config::ServerConfig;

/// State shared across every HTTP handler and every control-protocol
/// session.
#[derive(Clone)]
pub struct AppState {
    /// The worker pool; one per process, loaded once at startup.
    pub pool: Arc<Pool>,
    /// Resolved server configuration.
    pub config: Arc<ServerConfig>,
    /// Process start time, used to compute uptime for `/v1/metrics`.
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("uptime_secs", &self.started_at.elapsed().as_secs())
            .finish()
    }
}

impl AppState {
    pub fn new(pool: Arc<Pool>, config: Arc<ServerConfig>) -> Self {
        Self {
            pool,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
