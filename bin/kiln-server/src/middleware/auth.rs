//! Pluggable bearer-token auth for `/admin/*` routes (§9(c)): policy lives
//! entirely in [`crate::config::ServerConfig::admin_token`]; when unset,
//! admin routes are unauthenticated.

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::body::Body;

use crate::state::AppState;

pub async fn check_admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.admin_token {
        let provided = req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match provided {
            Some(token) if token == expected => {}
            _ => {
                return (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({
                        "error": { "message": "unauthorized", "type": "invalid_request_error", "code": "401" }
                    })),
                )
                    .into_response();
            }
        }
    }
    next.run(req).await
}
