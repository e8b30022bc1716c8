//! The inference serving core: a bounded worker pool dispatching completion
//! requests to stateful model-execution workers, plus the streaming adapter
//! that turns a worker's token channel into SSE or JSON-RPC frames.
//!
//! This crate knows nothing about HTTP or WebSocket transport; `kiln-server`
//! wires [`pool::Pool`] and [`stream`] into Axum handlers and a JSON-RPC
//! control-protocol server.

pub mod error;
pub mod pool;
pub mod stream;
pub mod types;

pub use error::PoolError;
pub use pool::{Pool, PoolConfig};
pub use types::{Choice, CompletionRequest, CompletionResponse, PoolStats, StreamToken, Usage};
