use serde::Serialize;

use crate::{
    messages::Message,
    request::{GenerationSettings, ReasoningSettings},
};

/// Body of a `POST /chat/completions` request.
///
/// Streaming is always requested, whatever the caller intends to do with the
/// output, so that a stalled generation shows up as a stalled byte stream.
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<&'a ReasoningSettings>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn new(messages: &'a [Message], settings: &'a GenerationSettings) -> Self {
        Self {
            model: &settings.model,
            messages,
            temperature: settings.temperature,
            top_p: settings.top_p,
            top_k: settings.top_k,
            repetition_penalty: settings.repetition_penalty,
            min_tokens: settings.min_tokens,
            max_tokens: settings.max_tokens,
            logprobs: settings.logprobs,
            top_logprobs: settings.top_logprobs,
            reasoning: settings.reasoning.as_ref(),
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        }
    }

    /// Serialize the body with sonic-rs.
    pub fn to_body(&self) -> crate::Result<Vec<u8>> {
        sonic_rs::to_vec(self)
            .map_err(|e| crate::LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))
    }
}
