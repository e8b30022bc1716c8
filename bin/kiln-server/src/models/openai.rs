//! OpenAI-compatible completion and model-listing wire types (§6.1).
//!
//! Field names and optionality match the request/response bodies §6.1
//! specifies verbatim, so existing OpenAI-style SDK clients work against
//! `/v1/completions` and `/v1/chat/completions` without modification.

use serde::{Deserialize, Serialize};

use kiln_core::CompletionRequest;

fn default_max_tokens() -> usize {
    256
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

// ── Completions ──────────────────────────────────────────────────────────────

/// Request body for `POST /v1/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequestBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: i32,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequestBody {
    /// Converts a validated wire body into the pool's internal request
    /// type. `cancel` is the token the caller wires to its own disconnect
    /// detection.
    pub fn into_request(self, cancel: tokio_util::sync::CancellationToken) -> CompletionRequest {
        CompletionRequest {
            prompt: self.prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            stop: self.stop,
            stream: self.stream,
            timeout: None,
            cancel,
        }
    }
}

/// A single choice in a non-streaming completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceBody {
    pub index: usize,
    pub text: String,
    pub finish_reason: String,
}

/// Token accounting returned alongside a non-streaming completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageBody {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Response body for `POST /v1/completions` (non-streaming).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponseBody {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChoiceBody>,
    pub usage: UsageBody,
}

impl From<kiln_core::CompletionResponse> for CompletionResponseBody {
    fn from(resp: kiln_core::CompletionResponse) -> Self {
        Self {
            id: resp.id,
            object: "text_completion",
            created: resp.created,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|c| ChoiceBody {
                    index: c.index,
                    text: c.text,
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage: UsageBody {
                prompt_tokens: resp.usage.prompt_tokens,
                completion_tokens: resp.usage.completion_tokens,
                total_tokens: resp.usage.total_tokens,
            },
        }
    }
}

// ── Chat completions ─────────────────────────────────────────────────────────

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author (`"system"`, `"user"`, `"assistant"`).
    pub role: String,
    pub content: String,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequestBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: i32,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// A single choice in a non-streaming chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceBody {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Response body for `POST /v1/chat/completions` (non-streaming).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponseBody {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoiceBody>,
    pub usage: UsageBody,
}

// ── Models list ──────────────────────────────────────────────────────────────

/// A single model descriptor (OpenAI `/v1/models` format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

/// Response body for `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_body_defaults_match_spec() {
        let body: CompletionRequestBody = serde_json::from_str("{}").unwrap();
        assert_eq!(body.max_tokens, 256);
        assert_eq!(body.temperature, 0.7);
        assert_eq!(body.top_p, 0.95);
        assert!(!body.stream);
    }

    #[test]
    fn completion_response_body_carries_object_tag() {
        let resp = kiln_core::CompletionResponse {
            id: "cmpl-1".into(),
            created: 0,
            model: "kiln".into(),
            choices: vec![],
            usage: kiln_core::Usage::default(),
        };
        let body: CompletionResponseBody = resp.into();
        assert_eq!(body.object, "text_completion");
    }
}
