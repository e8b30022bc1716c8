//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `/v1/completions`, `/v1/chat/completions`, `/v1/models`, `/v1/model`,
//!   `/v1/metrics`
//! - `/health`, `/ready`, `/live` (public liveness/readiness)
//! - `/admin/*` (health + metrics, behind bearer auth when configured)
//! - `/mcp/ws` (the JSON-RPC control protocol, see [`crate::control`])

mod chat;
mod completions;
mod health;
mod metrics;
mod models;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::control;
use crate::middleware::{self, TraceLayer};
use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/completions", post(completions::completions))
        .route("/chat/completions", post(chat::chat_completions))
        .route("/models", get(models::list_models))
        .route("/model", get(models::get_model))
        .route("/metrics", get(metrics::metrics));

    let admin = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth::check_admin_auth));

    let cors = middleware::cors::cors_layer(&state.config);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::health))
        .route("/live", get(health::health))
        .nest("/v1", v1)
        .nest("/admin", admin)
        .nest("/mcp", control::router())
        .layer(TraceLayer::new())
        .layer(cors)
        .with_state(state)
}
