use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A text- or chat-completion request, already flattened to a single
/// prompt by the time it reaches the pool (the chat façade does the
/// flattening upstream; see `kiln_core::pool`).
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub stop: Vec<String>,
    pub stream: bool,
    /// Request-scoped deadline; `None` falls back to the pool's default.
    pub timeout: Option<Duration>,
    /// The request's cancellation token — the Rust analogue of the Go
    /// contract's `ctx`. Callers that need to cancel mid-flight (an HTTP
    /// client disconnecting, a control-protocol session closing) hold a
    /// clone and call `.cancel()`; the worker observes it at the next token
    /// boundary (§4.2, §9 "cooperative cancellation at token boundaries").
    pub cancel: CancellationToken,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            stop: Vec::new(),
            stream: false,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// One finished choice in a non-streaming [`CompletionResponse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub text: String,
    pub finish_reason: String,
}

/// Token accounting for one completed request.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// The accumulated, non-streaming result of [`crate::pool::Pool::submit`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

/// One step of [`crate::pool::Pool::submit_stream`]'s token channel.
///
/// A channel produces a finite sequence ending with exactly one terminal
/// element (`is_complete = true` or `error.is_some()`), after which the
/// producer closes the channel.
#[derive(Clone, Debug)]
pub struct StreamToken {
    pub token: String,
    pub is_complete: bool,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
    /// Populated only on the terminal frame of a successful generation.
    pub usage: Option<Usage>,
}

impl StreamToken {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            token: text.into(),
            is_complete: false,
            finish_reason: None,
            error: None,
            usage: None,
        }
    }

    pub fn terminal(finish_reason: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            is_complete: true,
            finish_reason: Some(finish_reason.into()),
            error: None,
            usage: None,
        }
    }

    pub fn terminal_with_text(text: impl Into<String>, finish_reason: impl Into<String>) -> Self {
        Self {
            token: text.into(),
            is_complete: true,
            finish_reason: Some(finish_reason.into()),
            error: None,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            is_complete: true,
            finish_reason: None,
            error: Some(message.into()),
            usage: None,
        }
    }
}

/// A snapshot of pool-level bookkeeping, returned by [`crate::pool::Pool::stats`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub active_requests: usize,
    pub queued_requests: usize,
    pub total_requests: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub queue_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_has_sane_bounds() {
        let r = CompletionRequest::default();
        assert!(r.max_tokens > 0);
        assert!(r.temperature >= 0.0 && r.temperature <= 2.0);
        assert!(r.top_p > 0.0 && r.top_p <= 1.0);
    }

    #[test]
    fn stream_token_constructors_set_terminal_flags() {
        assert!(!StreamToken::delta("a").is_complete);
        assert!(StreamToken::terminal("stop").is_complete);
        assert!(StreamToken::error("boom").error.is_some());
    }
}
