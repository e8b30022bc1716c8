//! `POST /v1/completions` and the validation + dispatch logic shared with
//! the chat façade (`routes/chat.rs`).

use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kiln_core::stream::sse as sse_frame;
use kiln_core::{CompletionRequest, StreamToken};

use crate::error::ServerError;
use crate::models::openai::{CompletionRequestBody, CompletionResponseBody};
use crate::state::AppState;

/// System-wide ceiling on `max_tokens`, independent of any per-request value.
const SYSTEM_MAX_TOKENS: usize = 4096;

pub async fn completions(
    State(state): State<AppState>,
    Json(body): Json<CompletionRequestBody>,
) -> Result<Response, ServerError> {
    validate(&body)?;
    run_completion(state, body).await
}

/// Validates a completion body against §4.5's bounds.
pub fn validate(body: &CompletionRequestBody) -> Result<(), ServerError> {
    if body.prompt.trim().is_empty() {
        return Err(ServerError::InvalidRequest(
            "prompt must not be empty".to_owned(),
        ));
    }
    if body.max_tokens < 1 || body.max_tokens > SYSTEM_MAX_TOKENS {
        return Err(ServerError::InvalidRequest(format!(
            "max_tokens must be between 1 and {SYSTEM_MAX_TOKENS}"
        )));
    }
    if !(0.0..=2.0).contains(&body.temperature) {
        return Err(ServerError::InvalidRequest(
            "temperature must be in [0.0, 2.0]".to_owned(),
        ));
    }
    if body.top_p <= 0.0 || body.top_p > 1.0 {
        return Err(ServerError::InvalidRequest(
            "top_p must be in (0.0, 1.0]".to_owned(),
        ));
    }
    Ok(())
}

/// Builds the pool request and dispatches to the accumulating path or the
/// SSE path, depending on `body.stream`. Shared with the chat façade, which
/// validates and flattens its own body into a [`CompletionRequestBody`]
/// first.
pub async fn run_completion(
    state: AppState,
    body: CompletionRequestBody,
) -> Result<Response, ServerError> {
    let streaming = body.stream;
    let cancel = CancellationToken::new();
    let request = body.into_request(cancel.clone());

    if streaming {
        stream_completion(state, request, cancel).await
    } else {
        let response = state.pool.submit(request).await?;
        Ok(Json(CompletionResponseBody::from(response)).into_response())
    }
}

/// Non-streaming submit, returning the wire DTO directly rather than an
/// already-built `Response` — shared by the chat façade, which reshapes the
/// result into a `message`-bearing chat response instead of emitting it
/// verbatim.
pub async fn submit(
    state: AppState,
    body: CompletionRequestBody,
) -> Result<CompletionResponseBody, ServerError> {
    let cancel = CancellationToken::new();
    let request = body.into_request(cancel);
    let response = state.pool.submit(request).await?;
    Ok(CompletionResponseBody::from(response))
}

/// Cancels the request's token when dropped — the hook that turns an Axum
/// client disconnect (which drops the response body stream without
/// polling it again) into upstream cancellation (§4.4 invariant (c)).
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn stream_completion(
    state: AppState,
    request: CompletionRequest,
    cancel: CancellationToken,
) -> Result<Response, ServerError> {
    let id = format!("cmpl-{}", Uuid::new_v4());
    let model = state.config.model_path.clone();
    let created = unix_now();

    let rx = state.pool.submit_stream(request).await?;

    let events = token_event_stream(rx, cancel, id, model, created);
    let sse = Sse::new(events).keep_alive(KeepAlive::new());
    let mut response = sse.into_response();
    for (name, value) in sse_frame::SSE_HEADERS {
        response.headers_mut().insert(
            axum::http::HeaderName::from_static(name),
            axum::http::HeaderValue::from_static(value),
        );
    }
    Ok(response)
}

/// Turns the pool's token channel into the Axum SSE event stream: one
/// `Event` per chunk, closing with the literal `[DONE]` line once the
/// channel's terminal element has been observed.
fn token_event_stream(
    rx: mpsc::Receiver<StreamToken>,
    cancel: CancellationToken,
    id: String,
    model: String,
    created: i64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = CancelOnDrop(cancel);
    let body = stream::unfold(
        (rx, guard, id, model, created, false),
        |(mut rx, guard, id, model, created, done)| async move {
            if done {
                return None;
            }
            let token = rx.recv().await?;
            let is_terminal = token.is_complete || token.error.is_some();
            let event = if let Some(message) = &token.error {
                Event::default().data(sse_frame::error_payload(message))
            } else {
                let payload = sse_frame::chunk_payload(&id, &model, created, &token)
                    .unwrap_or_default();
                Event::default().data(payload)
            };
            Some((Ok(event), (rx, guard, id, model, created, is_terminal)))
        },
    );
    body.chain(stream::once(async { Ok(Event::default().data("[DONE]")) }))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_body() -> CompletionRequestBody {
        CompletionRequestBody {
            prompt: "hello".to_owned(),
            max_tokens: 32,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            stop: Vec::new(),
            stream: false,
        }
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let body = CompletionRequestBody {
            prompt: "   ".to_owned(),
            ..valid_body()
        };
        assert!(validate(&body).is_err());
    }

    #[test]
    fn max_tokens_out_of_range_is_rejected() {
        let body = CompletionRequestBody {
            max_tokens: 0,
            ..valid_body()
        };
        assert!(validate(&body).is_err());

        let body = CompletionRequestBody {
            max_tokens: SYSTEM_MAX_TOKENS + 1,
            ..valid_body()
        };
        assert!(validate(&body).is_err());
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let body = CompletionRequestBody {
            temperature: 2.5,
            ..valid_body()
        };
        assert!(validate(&body).is_err());
    }

    #[test]
    fn top_p_must_be_in_unit_interval_excluding_zero() {
        let body = CompletionRequestBody {
            top_p: 0.0,
            ..valid_body()
        };
        assert!(validate(&body).is_err());

        let body = CompletionRequestBody {
            top_p: 1.5,
            ..valid_body()
        };
        assert!(validate(&body).is_err());
    }

    #[test]
    fn valid_body_passes() {
        assert!(validate(&valid_body()).is_ok());
    }
}
