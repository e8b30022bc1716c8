//! JSON-RPC 2.0 method dispatch for the control protocol (§4.6).
//!
//! Every inbound text frame is one JSON-RPC request; replies and streaming
//! result frames go out through [`Session::send_or_close`], never back as a
//! function return, since `inference/generate` with `stream: true` produces
//! many frames over time rather than one.

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::{json, Value};

use kiln_core::stream::{drive, rpc};
use kiln_core::StreamToken;

use crate::models::openai::CompletionRequestBody;
use crate::state::AppState;

use super::session::Session;

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Parses `text` as a JSON-RPC envelope and dispatches it, sending the
/// reply (or replies, for a streaming generation) onto `session`'s
/// outbound queue.
pub async fn handle_message(state: &AppState, session: &Arc<Session>, text: &str) {
    let envelope: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return send_error(session, Value::Null, PARSE_ERROR, "parse error"),
    };

    let id = envelope.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = envelope.get("method").and_then(Value::as_str) else {
        return send_error(session, id, INVALID_REQUEST, "invalid request: missing method");
    };

    match method {
        "initialize" => reply(session, id, initialize_result()),
        "ping" => reply(session, id, json!("pong")),
        "inference/generate" => {
            let params = envelope.get("params").cloned().unwrap_or(Value::Null);
            handle_generate(state, session, id, params).await;
        }
        _ => send_error(session, id, METHOD_NOT_FOUND, "method not found"),
    }
}

fn initialize_result() -> Value {
    json!({
        "server_info": { "name": "kiln-server", "version": env!("CARGO_PKG_VERSION") },
        "capabilities": { "inference": { "supports_streaming": true } },
    })
}

async fn handle_generate(state: &AppState, session: &Arc<Session>, id: Value, params: Value) {
    let body: CompletionRequestBody = match serde_json::from_value(params) {
        Ok(b) => b,
        Err(e) => return send_error(session, id, INVALID_PARAMS, &format!("invalid params: {e}")),
    };

    let streaming = body.stream;
    let request = body.into_request(session.cancel.clone());

    if streaming {
        let rx = match state.pool.submit_stream(request).await {
            Ok(rx) => rx,
            Err(e) => return send_error(session, id, INTERNAL_ERROR, &e.to_string()),
        };
        let session = Arc::clone(session);
        tokio::spawn(async move {
            drive(rx, |token| {
                let frame = rpc::result_frame(id.clone(), &token);
                session.send(Message::Text(frame.to_string().into()))
            })
            .await;
        });
    } else {
        match state.pool.submit(request).await {
            Ok(response) => {
                let choice = response.choices.into_iter().next().unwrap_or_default_choice();
                let token = StreamToken::terminal_with_text(choice.text, choice.finish_reason)
                    .with_usage(response.usage);
                let frame = rpc::result_frame(id, &token);
                session.send_or_close(Message::Text(frame.to_string().into()));
            }
            Err(e) => send_error(session, id, INTERNAL_ERROR, &e.to_string()),
        }
    }
}

fn reply(session: &Session, id: Value, result: Value) {
    let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
    session.send_or_close(Message::Text(frame.to_string().into()));
}

fn send_error(session: &Session, id: Value, code: i64, message: &str) {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    });
    session.send_or_close(Message::Text(frame.to_string().into()));
}

/// Small helper so a response with no choices (shouldn't happen, but the
/// pool's `Vec<Choice>` doesn't guarantee it) still produces a sane frame.
trait OptionChoiceExt {
    fn unwrap_or_default_choice(self) -> kiln_core::Choice;
}

impl OptionChoiceExt for Option<kiln_core::Choice> {
    fn unwrap_or_default_choice(self) -> kiln_core::Choice {
        self.unwrap_or(kiln_core::Choice {
            index: 0,
            text: String::new(),
            finish_reason: "stop".to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message as WsMessage;

    fn recv_json(rx: &mut tokio::sync::mpsc::Receiver<WsMessage>) -> Value {
        match rx.try_recv().expect("expected a queued frame") {
            WsMessage::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_replies_with_pong_result() {
        let (session, mut rx) = Session::new();
        reply(&session, json!(1), json!("pong"));
        let frame = recv_json(&mut rx);
        assert_eq!(frame["id"], json!(1));
        assert_eq!(frame["result"], json!("pong"));
    }

    #[test]
    fn send_error_preserves_id_and_code() {
        let (session, mut rx) = Session::new();
        send_error(&session, json!("abc"), METHOD_NOT_FOUND, "method not found");
        let frame = match rx.try_recv().unwrap() {
            WsMessage::Text(t) => serde_json::from_str::<Value>(&t).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        };
        assert_eq!(frame["id"], json!("abc"));
        assert_eq!(frame["error"]["code"], json!(METHOD_NOT_FOUND));
    }
}
