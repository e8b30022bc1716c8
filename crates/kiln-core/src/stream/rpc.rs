//! JSON-RPC streaming-result frame construction (§4.4, §6.2).
//!
//! Every token produces one JSON-RPC message reusing the originating
//! request's `id`; the terminal message carries `result.done = true`. The
//! `id` is preserved verbatim (number, string or null) per §9 — never
//! coerced to a different JSON type.

use serde_json::{json, Value};

use crate::types::StreamToken;

/// Builds the streaming JSON-RPC result frame for one [`StreamToken`].
///
/// `id` must be the exact `id` value from the originating request.
pub fn result_frame(id: Value, token: &StreamToken) -> Value {
    if let Some(message) = &token.error {
        return error_frame(id, message);
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "chunk": token.token,
            "streaming": true,
            "done": token.is_complete,
        }
    })
}

/// Builds a JSON-RPC error envelope (`-32603`, internal error) for a
/// mid-stream failure.
pub fn error_frame(id: Value, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": -32603, "message": message }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_numeric_id_verbatim() {
        let frame = result_frame(json!(2), &StreamToken::delta("hi"));
        assert_eq!(frame["id"], json!(2));
        assert_eq!(frame["result"]["done"], false);
    }

    #[test]
    fn preserves_string_id_and_sets_done_on_terminal() {
        let frame = result_frame(json!("abc"), &StreamToken::terminal("stop"));
        assert_eq!(frame["id"], json!("abc"));
        assert_eq!(frame["result"]["done"], true);
    }

    #[test]
    fn preserves_null_id() {
        let frame = result_frame(Value::Null, &StreamToken::delta("x"));
        assert_eq!(frame["id"], Value::Null);
    }

    #[test]
    fn error_token_becomes_error_envelope() {
        let frame = result_frame(json!(1), &StreamToken::error("boom"));
        assert_eq!(frame["error"]["message"], "boom");
        assert!(frame.get("result").is_none());
    }
}
