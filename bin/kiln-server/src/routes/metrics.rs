//! `GET /v1/metrics`, `GET /admin/metrics` — a merged snapshot of
//! [`kiln_core::PoolStats`], [`kiln_runtime::RuntimeStats`] and process
//! uptime (§4.5).

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use kiln_core::PoolStats;
use kiln_runtime::RuntimeStats;

use crate::state::AppState;

/// `kiln_runtime::RuntimeStats` carries no serde derive — the runtime crate
/// stays transport-agnostic — so this wire body mirrors its fields.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatsBody {
    pub model_loaded: bool,
    pub gpu_layers_loaded: i32,
    pub memory_usage_bytes: u64,
    pub tokens_processed: u64,
    pub requests_served: u64,
    pub average_tokens_per_sec: f64,
}

impl From<RuntimeStats> for RuntimeStatsBody {
    fn from(s: RuntimeStats) -> Self {
        Self {
            model_loaded: s.model_loaded,
            gpu_layers_loaded: s.gpu_layers_loaded,
            memory_usage_bytes: s.memory_usage_bytes,
            tokens_processed: s.tokens_processed,
            requests_served: s.requests_served,
            average_tokens_per_sec: s.average_tokens_per_sec,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub pool: PoolStats,
    pub runtime: RuntimeStatsBody,
    pub uptime_seconds: u64,
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        pool: state.pool.stats(),
        runtime: state.pool.engine_stats().into(),
        uptime_seconds: state.uptime_secs(),
    })
}
