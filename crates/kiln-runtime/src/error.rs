use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the native runtime layer.
///
/// `ModelLoad`, `ContextCreate`, `LibraryLoad` and `Tokenize` are fatal at
/// the point they occur (pool init, or the one-time per-worker setup that
/// precedes generation). `GenerateFailed` surfaces as the terminal element
/// of a token sequence without affecting the worker. `GenerateFatal` means
/// the native handle itself is no longer trustworthy; the caller must
/// close it and the pool must retire the worker.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to load native runtime library at {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load model from {model_path}: {source}")]
    ModelLoad {
        model_path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create inference context: {source}")]
    ContextCreate {
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to tokenize prompt: {source}")]
    Tokenize {
        #[source]
        source: anyhow::Error,
    },

    #[error("generation step failed: {message}")]
    GenerateFailed { message: String },

    #[error("generation step failed fatally, handle must be closed: {message}")]
    GenerateFatal { message: String },

    #[error("native runtime handle already closed")]
    Closed,
}
