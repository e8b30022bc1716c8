use thiserror::Error;

/// Errors surfaced by the worker pool to its callers (HTTP handlers, the
/// control protocol dispatcher).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("admission queue is at capacity")]
    QueueFull,

    #[error("request timed out before a worker picked it up")]
    Timeout,

    #[error("request was cancelled")]
    Cancelled,

    #[error("runtime error: {0}")]
    Runtime(#[from] kiln_runtime::RuntimeError),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("worker failed fatally and was retired: {0}")]
    RuntimeFatal(String),

    #[error("pool has not been initialized")]
    NotInitialized,

    #[error("no workers are available")]
    WorkerUnavailable,

    #[error("pool is shutting down")]
    Closed,
}

impl PoolError {
    /// The error-kind string used in HTTP/JSON-RPC error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::QueueFull => "queue_full",
            PoolError::Timeout => "timeout",
            PoolError::Cancelled => "cancelled",
            PoolError::Runtime(_) | PoolError::Generation(_) => "runtime_error",
            PoolError::RuntimeFatal(_) => "runtime_fatal",
            PoolError::NotInitialized | PoolError::WorkerUnavailable | PoolError::Closed => {
                "server_error"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_maps_to_expected_kind() {
        assert_eq!(PoolError::QueueFull.kind(), "queue_full");
    }
}
