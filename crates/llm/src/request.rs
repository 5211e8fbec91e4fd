use serde::{Deserialize, Serialize};

use crate::{error::LlmError, messages::Message};

const MAX_TEMPERATURE: f64 = 1.5;

/// A complete generation request: conversation plus settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub settings: GenerationSettings,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            settings: GenerationSettings::new(model),
        }
    }
}

/// Sampling and output controls for one generation.
///
/// Unset fields are omitted from the request so the provider defaults apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSettings {
    /// Model identifier, e.g. `openai/gpt-4o-mini`.
    pub model: String,
    /// Sampling temperature, clamped to `[0.0, 1.5]` before dispatch.
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub repetition_penalty: Option<f64>,
    pub min_tokens: Option<u32>,
    /// Upper bound on generated tokens, floored at 1 before dispatch.
    pub max_tokens: Option<u32>,
    /// Return log probabilities of the output tokens.
    pub logprobs: Option<bool>,
    /// Number of alternatives to report per token when `logprobs` is set.
    pub top_logprobs: Option<u32>,
    pub reasoning: Option<ReasoningSettings>,
}

impl GenerationSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Check caller input and bring values into their accepted ranges.
    ///
    /// Out-of-range temperatures are clamped and token limits are floored at 1;
    /// only input that cannot be repaired is rejected.
    pub fn validated(&self) -> crate::Result<GenerationSettings> {
        let mut settings = self.clone();

        if settings.model.trim().is_empty() {
            return Err(LlmError::InvalidRequest("model must not be empty".to_string()));
        }

        if let Some(temperature) = settings.temperature {
            if !temperature.is_finite() {
                return Err(LlmError::InvalidRequest(format!(
                    "temperature must be a finite number, got {temperature}"
                )));
            }

            let clamped = temperature.clamp(0.0, MAX_TEMPERATURE);

            if clamped != temperature {
                log::debug!("Clamping temperature {temperature} to {clamped}");
            }

            settings.temperature = Some(clamped);
        }

        if let Some(top_p) = settings.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(LlmError::InvalidRequest(format!("top_p must be within [0, 1], got {top_p}")));
        }

        settings.max_tokens = settings.max_tokens.map(|tokens| tokens.max(1));

        if let Some(reasoning) = settings.reasoning.as_mut() {
            if reasoning.effort.is_some() && reasoning.max_tokens.is_some() {
                return Err(LlmError::InvalidRequest(
                    "reasoning accepts either effort or max_tokens, not both".to_string(),
                ));
            }

            reasoning.max_tokens = reasoning.max_tokens.map(|tokens| tokens.max(1));
        }

        Ok(settings)
    }
}

/// Controls for models that produce hidden reasoning before answering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Reason internally but leave the reasoning out of the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}
