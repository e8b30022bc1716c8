//! `POST /v1/chat/completions` — a thin façade that flattens a role-tagged
//! message sequence into a single prompt, then delegates to the same
//! dispatch path as `/v1/completions` (§4.5, §9(a)).

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ServerError;
use crate::models::openai::{
    ChatChoiceBody, ChatCompletionResponseBody, ChatMessage, CompletionRequestBody,
    CompletionResponseBody, UsageBody,
};
use crate::routes::completions;
use crate::state::AppState;

/// Renders `messages` into the deterministic prompt template resolved in
/// §9(a): one `"{Role}: {content}\n"` line per message (role capitalized on
/// its first letter), followed by a final literal `"Assistant:"` line with
/// no trailing newline.
///
/// Not escaped against a message containing a crafted `"\nUser: "` turn
/// boundary — out of scope for a serving core that isn't a multi-tenant
/// trust boundary (§9(a)).
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(&capitalize(&message.role));
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<crate::models::openai::ChatCompletionRequestBody>,
) -> Result<Response, ServerError> {
    if body.messages.is_empty() {
        return Err(ServerError::InvalidRequest(
            "messages must not be empty".to_owned(),
        ));
    }

    let streaming = body.stream;
    let completion_body = CompletionRequestBody {
        prompt: flatten_messages(&body.messages),
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        top_p: body.top_p,
        top_k: body.top_k,
        stop: body.stop,
        stream: streaming,
    };
    completions::validate(&completion_body)?;

    // Streaming chat replies reuse the completions SSE framing verbatim
    // (§9(b): HTTP and WebSocket are two projections of one contract, not
    // two independently-shaped wire formats); only the non-streaming body
    // is reshaped into the `message`-bearing chat response below, since
    // that much is observable from a single JSON body with no streaming
    // framing decision to make.
    if streaming {
        return completions::run_completion(state, completion_body).await;
    }

    let response = completions::submit(state, completion_body).await?;
    Ok(Json(to_chat_response(response)).into_response())
}

fn to_chat_response(response: CompletionResponseBody) -> ChatCompletionResponseBody {
    ChatCompletionResponseBody {
        id: response.id,
        object: "chat.completion",
        created: response.created,
        model: response.model,
        choices: response
            .choices
            .into_iter()
            .map(|c| ChatChoiceBody {
                index: c.index,
                message: ChatMessage {
                    role: "assistant".to_owned(),
                    content: c.text,
                },
                finish_reason: c.finish_reason,
            })
            .collect(),
        usage: UsageBody {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_owned(),
            content: content.to_owned(),
        }
    }

    #[test]
    fn flattens_messages_in_order_with_capitalized_roles() {
        let prompt = flatten_messages(&[
            msg("system", "you are terse"),
            msg("user", "hello"),
        ]);
        assert_eq!(prompt, "System: you are terse\nUser: hello\nAssistant:");
    }

    #[test]
    fn ends_with_assistant_marker_and_no_trailing_newline() {
        let prompt = flatten_messages(&[msg("user", "hi")]);
        assert!(prompt.ends_with("Assistant:"));
        assert!(!prompt.ends_with('\n'));
    }

    #[test]
    fn unescaped_newline_can_spoof_a_turn_boundary() {
        // Documented limitation (§9(a)): content is not escaped, so two
        // distinct message sequences can render to the same prompt text.
        let two_messages = flatten_messages(&[msg("user", "a"), msg("user", "b")]);
        let one_spoofed_message = flatten_messages(&[msg("user", "a\nUser: b")]);
        assert_eq!(two_messages, one_spoofed_message);
    }

    #[test]
    fn unknown_role_is_passed_through_unchanged() {
        let prompt = flatten_messages(&[msg("tool", "result")]);
        assert!(prompt.starts_with("Tool: result"));
    }

    #[test]
    fn to_chat_response_wraps_text_in_an_assistant_message() {
        let completion = CompletionResponseBody {
            id: "cmpl-1".into(),
            object: "text_completion",
            created: 0,
            model: "kiln".into(),
            choices: vec![crate::models::openai::ChoiceBody {
                index: 0,
                text: "hello there".into(),
                finish_reason: "stop".into(),
            }],
            usage: UsageBody {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            },
        };
        let chat = to_chat_response(completion);
        assert_eq!(chat.object, "chat.completion");
        assert_eq!(chat.choices[0].message.role, "assistant");
        assert_eq!(chat.choices[0].message.content, "hello there");
        assert_eq!(chat.choices[0].finish_reason, "stop");
        assert_eq!(chat.usage.total_tokens, 5);
    }
}
