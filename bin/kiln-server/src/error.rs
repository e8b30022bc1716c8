//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted to
//! a `{"error":{"message","type","code"}}` JSON body with an appropriate
//! status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use kiln_core::PoolError;

/// All errors that can occur in the kiln-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller sent an invalid or malformed request.
    #[error("{0}")]
    InvalidRequest(String),

    /// Propagated from the worker pool.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// An unclassified internal server error.
    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    /// `(status, error.type)` pair per the request/response error mapping.
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            ServerError::Pool(e) => pool_error_parts(e),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        }
    }
}

/// Maps a [`PoolError`] to its wire status/type, keyed off [`PoolError::kind`]
/// so the two stay in lockstep rather than re-deriving the same distinction
/// via an independent match on `PoolError`'s variants.
fn pool_error_parts(err: &PoolError) -> (StatusCode, &'static str) {
    match err.kind() {
        "queue_full" => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
        "timeout" => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        "cancelled" => (StatusCode::BAD_REQUEST, "cancelled"),
        "runtime_fatal" => (StatusCode::SERVICE_UNAVAILABLE, "server_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.parts();
        let message = self.to_string();
        let body = json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16().to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_maps_to_429_and_rate_limit_type() {
        let err = ServerError::Pool(PoolError::QueueFull);
        let (status, kind) = err.parts();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(kind, "rate_limit_exceeded");
    }

    #[test]
    fn timeout_maps_to_504() {
        let err = ServerError::Pool(PoolError::Timeout);
        assert_eq!(err.parts().0, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn invalid_request_maps_to_400() {
        let err = ServerError::InvalidRequest("missing prompt".into());
        let (status, kind) = err.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(kind, "invalid_request_error");
    }

    #[test]
    fn runtime_fatal_maps_to_503() {
        let err = ServerError::Pool(PoolError::RuntimeFatal("context lost".into()));
        assert_eq!(err.parts().0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
