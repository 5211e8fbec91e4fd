use serde::Serialize;

use crate::messages::GeneratedImage;

/// The result of one fully consumed response stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccumulatedResponse {
    /// Text deltas concatenated in arrival order.
    pub text: String,
    /// Images delivered on the terminal chunk.
    pub images: Vec<GeneratedImage>,
    pub finish_reason: Option<String>,
    /// Finish reason as reported by the upstream model provider.
    pub native_finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub model: Option<String>,
    /// Last data line of the stream, kept for diagnosing incomplete generations.
    #[serde(skip)]
    pub last_line: Option<String>,
}

impl AccumulatedResponse {
    /// True when the stream produced neither text nor images.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }

    /// Classified finish reason, preferring the normalized one over the native one.
    pub fn finish(&self) -> Option<FinishReason> {
        self.finish_reason
            .as_deref()
            .or(self.native_finish_reason.as_deref())
            .map(FinishReason::parse)
    }
}

/// Token accounting reported on the final chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    /// Cost in credits, when the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other(String),
}

impl FinishReason {
    /// Classify a finish reason string from either the normalized or the
    /// provider-native field.
    pub fn parse(reason: &str) -> Self {
        match reason.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" | "eos" | "completed" => Self::Stop,
            "length" | "max_tokens" | "max_output_tokens" => Self::Length,
            "content_filter" | "safety" | "prohibited_content" | "recitation" | "blocklist" | "spii"
            | "refusal" | "image_safety" => Self::ContentFilter,
            "tool_calls" | "function_call" | "tool_use" => Self::ToolCalls,
            "error" => Self::Error,
            _ => Self::Other(reason.to_string()),
        }
    }

    /// Whether a generation ending this way is complete enough to hand back.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Stop | Self::Length)
    }
}
