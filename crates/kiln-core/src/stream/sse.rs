//! SSE frame construction for `text_completion.chunk` events (§4.4, §6.1).
//!
//! Every non-terminal token becomes a `data:` chunk carrying the incremental
//! delta; the terminal token becomes a final chunk with `finish_reason` set,
//! followed by the literal `data: [DONE]` line. Every frame is a single
//! `data:` line terminated by a blank line.

use serde::Serialize;

use crate::types::StreamToken;

#[derive(Serialize)]
struct SseChoice {
    index: usize,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
}

#[derive(Serialize)]
struct SseChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    choices: [SseChoice; 1],
}

/// Builds the JSON payload for one [`StreamToken`]'s `data:` line, without
/// the `data: `/blank-line framing — the shape an SSE library (e.g. Axum's
/// `Event::data`) wraps itself.
///
/// Returns `None` for an error token; callers should emit [`error_frame`]
/// instead so the error shape (`error: {message,type,code}`) is used rather
/// than a chunk.
pub fn chunk_payload(id: &str, model: &str, created: i64, token: &StreamToken) -> Option<String> {
    if token.error.is_some() {
        return None;
    }
    let chunk = SseChunk {
        id,
        object: "text_completion.chunk",
        created,
        model,
        choices: [SseChoice {
            index: 0,
            text: token.token.clone(),
            finish_reason: token.finish_reason.clone(),
        }],
    };
    Some(serde_json::to_string(&chunk).expect("SseChunk serializes infallibly"))
}

/// Formats one [`StreamToken`] as a complete, literal SSE event
/// (`data: ...\n\n`) — used where frames are written directly to a raw
/// writer rather than through an SSE-framing library.
pub fn chunk_frame(id: &str, model: &str, created: i64, token: &StreamToken) -> Option<String> {
    chunk_payload(id, model, created, token).map(|body| format!("data: {body}\n\n"))
}

/// Builds the JSON payload for a mid-stream error, without `data:` framing.
pub fn error_payload(message: &str) -> String {
    let body = serde_json::json!({
        "error": { "message": message, "type": "server_error", "code": "500" }
    });
    body.to_string()
}

/// Formats a mid-stream error as a complete, literal SSE frame
/// (`data: {"error":{...}}\n\n`).
pub fn error_frame(message: &str) -> String {
    format!("data: {}\n\n", error_payload(message))
}

/// The literal terminator line every SSE completion stream ends with.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Required response headers for an SSE completion stream (§4.4).
pub const SSE_HEADERS: &[(&str, &str)] = &[
    ("content-type", "text/event-stream"),
    ("cache-control", "no-cache"),
    ("connection", "keep-alive"),
    ("x-accel-buffering", "no"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_frame_carries_incremental_text() {
        let tok = StreamToken::delta("hello");
        let frame = chunk_frame("cmpl-1", "kiln", 0, &tok).unwrap();
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"text\":\"hello\""));
        assert!(!frame.contains("finish_reason"));
    }

    #[test]
    fn terminal_frame_carries_finish_reason() {
        let tok = StreamToken::terminal("stop");
        let frame = chunk_frame("cmpl-1", "kiln", 0, &tok).unwrap();
        assert!(frame.contains("\"finish_reason\":\"stop\""));
    }

    #[test]
    fn error_token_yields_no_chunk_frame() {
        let tok = StreamToken::error("boom");
        assert!(chunk_frame("cmpl-1", "kiln", 0, &tok).is_none());
    }

    #[test]
    fn concatenated_deltas_reproduce_full_text() {
        let tokens = [
            StreamToken::delta("Hel"),
            StreamToken::delta("lo "),
            StreamToken::terminal_with_text("world", "stop"),
        ];
        let mut acc = String::new();
        for tok in &tokens {
            acc.push_str(&tok.token);
        }
        assert_eq!(acc, "Hello world");
    }
}
