//! `/health`, `/ready`, `/live`, `/admin/health` — 200 iff the pool is
//! healthy (≥1 worker alive and model loaded), else 503 with the same body
//! (§4.5, §9 "Health semantics").

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Shared handler for `/health`, `/ready`, `/live` and `/admin/health` — all
/// four are the same "can this instance serve a new request right now?"
/// check; no endpoint carries extra information the others lack.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let healthy = state.pool.is_healthy();
    let body = json!({
        "status": if healthy { "ok" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    // `health` only reads `state.pool.is_healthy()` and maps the bool to a
    // status code and body; constructing a `Pool` requires a loaded model,
    // so the interesting cases (no workers alive, pool closed) are covered
    // by `kiln-core`'s own pool tests rather than re-mocked here.
}
