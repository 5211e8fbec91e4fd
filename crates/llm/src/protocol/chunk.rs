use std::borrow::Cow;

use serde::Deserialize;
use sonic_rs::{JsonValueTrait, Value};

use crate::{
    messages::{GeneratedImage, ImageUrl},
    response::Usage,
};

/// One decoded `data:` payload of the event stream.
///
/// Every field is optional: whatever is present is extracted, anything else
/// is ignored, so providers adding or omitting fields never break a stream.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ProtocolChunk<'a> {
    pub model: Option<Cow<'a, str>>,
    pub text: Option<Cow<'a, str>>,
    pub images: Vec<GeneratedImage>,
    pub finish_reason: Option<Cow<'a, str>>,
    pub native_finish_reason: Option<Cow<'a, str>>,
    pub usage: Option<Usage>,
    /// Message of an `error` object sent in place of a regular chunk.
    pub error: Option<String>,
}

impl<'a> ProtocolChunk<'a> {
    pub fn parse(data: &'a str) -> Result<Self, sonic_rs::Error> {
        let raw: RawChunk<'a> = sonic_rs::from_str(data)?;
        let choice = raw.choices.and_then(|choices| choices.into_iter().next());

        let (text, images, finish_reason, native_finish_reason) = match choice {
            Some(choice) => {
                let delta = choice.delta.or(choice.message).unwrap_or_default();

                let images = delta
                    .images
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(RawImage::into_image)
                    .collect();

                (
                    delta.content,
                    images,
                    non_empty(choice.finish_reason),
                    non_empty(choice.native_finish_reason),
                )
            }
            None => (None, Vec::new(), None, None),
        };

        Ok(Self {
            model: non_empty(raw.model),
            text,
            images,
            finish_reason,
            native_finish_reason,
            usage: raw.usage.map(RawUsage::into_usage),
            error: raw.error.map(RawError::into_message),
        })
    }
}

fn non_empty(value: Option<Cow<'_, str>>) -> Option<Cow<'_, str>> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Deserialize)]
struct RawChunk<'a> {
    #[serde(borrow, default)]
    model: Option<Cow<'a, str>>,
    #[serde(borrow, default)]
    choices: Option<Vec<RawChoice<'a>>>,
    #[serde(default)]
    usage: Option<RawUsage>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Deserialize)]
struct RawChoice<'a> {
    #[serde(borrow, default)]
    delta: Option<RawDelta<'a>>,
    // Some providers send the final chunk with `message` instead of `delta`.
    #[serde(borrow, default)]
    message: Option<RawDelta<'a>>,
    #[serde(borrow, default)]
    finish_reason: Option<Cow<'a, str>>,
    #[serde(borrow, default)]
    native_finish_reason: Option<Cow<'a, str>>,
}

#[derive(Default, Deserialize)]
struct RawDelta<'a> {
    #[serde(borrow, default)]
    content: Option<Cow<'a, str>>,
    #[serde(default)]
    images: Option<Vec<RawImage>>,
}

#[derive(Deserialize)]
struct RawImage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    image_url: Option<RawImageUrl>,
}

#[derive(Deserialize)]
struct RawImageUrl {
    #[serde(default)]
    url: Option<String>,
}

impl RawImage {
    fn into_image(self) -> Option<GeneratedImage> {
        let url = self.image_url?.url.filter(|url| !url.is_empty())?;

        Some(GeneratedImage {
            kind: self.kind.unwrap_or_else(|| "image_url".to_string()),
            index: self.index,
            image_url: ImageUrl { url },
        })
    }
}

// Token counts stay untyped: a provider sending floats or strings must not
// cost the chunk its text and finish reason.
#[derive(Deserialize)]
struct RawUsage {
    #[serde(default)]
    prompt_tokens: Option<Value>,
    #[serde(default)]
    completion_tokens: Option<Value>,
    #[serde(default)]
    total_tokens: Option<Value>,
    #[serde(default)]
    completion_tokens_details: Option<Value>,
    #[serde(default)]
    cost: Option<Value>,
}

impl RawUsage {
    fn into_usage(self) -> Usage {
        let prompt_tokens = self.prompt_tokens.as_ref().and_then(extract_tokens).unwrap_or_default();
        let completion_tokens = self
            .completion_tokens
            .as_ref()
            .and_then(extract_tokens)
            .unwrap_or_default();

        let reasoning_tokens = self
            .completion_tokens_details
            .as_ref()
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(extract_tokens);

        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: self
                .total_tokens
                .as_ref()
                .and_then(extract_tokens)
                .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens)),
            reasoning_tokens,
            cost: self.cost.as_ref().and_then(extract_cost),
        }
    }
}

/// A token count as an integer, a whole float, or a numeric string.
fn extract_tokens(value: &Value) -> Option<u32> {
    if let Some(count) = value.as_u64() {
        return u32::try_from(count).ok();
    }

    let count = match value.as_str() {
        Some(count) => count.trim().parse::<f64>().ok()?,
        None => value.as_f64()?,
    };

    (0.0..=f64::from(u32::MAX)).contains(&count).then(|| count.round() as u32)
}

/// Cost arrives as a number, a numeric string, or an object with a total.
fn extract_cost(value: &Value) -> Option<f64> {
    if let Some(cost) = value.as_f64() {
        return Some(cost);
    }

    if let Some(cost) = value.as_str() {
        return cost.trim().parse().ok();
    }

    ["total_cost", "total", "amount"]
        .iter()
        .find_map(|key| value.get(*key).and_then(extract_cost))
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

impl RawError {
    fn into_message(self) -> String {
        let code = self.code.as_ref().and_then(|code| {
            code.as_str()
                .map(str::to_string)
                .or_else(|| code.as_i64().map(|c| c.to_string()))
        });

        match (self.message, code) {
            (Some(message), Some(code)) => format!("{message} (code {code})"),
            (Some(message), None) => message,
            (None, Some(code)) => format!("provider error code {code}"),
            (None, None) => "unspecified provider error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn text_delta() {
        let chunk = ProtocolChunk::parse(
            r#"{"id":"gen-1","model":"openai/gpt-4o-mini","choices":[{"index":0,"delta":{"role":"assistant","content":"Hello"},"finish_reason":null}]}"#,
        )
        .unwrap();

        assert_eq!(chunk.model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(chunk.text.as_deref(), Some("Hello"));
        assert_eq!(chunk.finish_reason, None);
        assert!(chunk.images.is_empty());
    }

    #[test]
    fn escaped_text_is_decoded() {
        let chunk = ProtocolChunk::parse(r#"{"choices":[{"delta":{"content":"a\nb \"c\""}}]}"#).unwrap();
        assert_eq!(chunk.text.as_deref(), Some("a\nb \"c\""));
    }

    #[test]
    fn terminal_chunk_with_usage_and_images() {
        let data = indoc! {r#"
            {
              "choices": [{
                "delta": {
                  "content": "",
                  "images": [
                    {"type": "image_url", "index": 0, "image_url": {"url": "data:image/png;base64,AAAA"}},
                    {"type": "image_url", "image_url": {}}
                  ]
                },
                "finish_reason": "stop",
                "native_finish_reason": "STOP"
              }],
              "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 30,
                "total_tokens": 42,
                "cost": 0.0021,
                "completion_tokens_details": {"reasoning_tokens": 8}
              }
            }
        "#};

        let chunk = ProtocolChunk::parse(data).unwrap();

        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
        assert_eq!(chunk.native_finish_reason.as_deref(), Some("STOP"));
        assert_eq!(chunk.images.len(), 1);
        assert_eq!(chunk.images[0].index, Some(0));

        insta::assert_json_snapshot!(chunk.usage, @r#"
        {
          "prompt_tokens": 12,
          "completion_tokens": 30,
          "total_tokens": 42,
          "reasoning_tokens": 8,
          "cost": 0.0021
        }
        "#);
    }

    #[test]
    fn cost_is_extracted_defensively() {
        let parse_cost = |json: &str| {
            let data = format!(r#"{{"choices":[],"usage":{{"prompt_tokens":1,"completion_tokens":2,"cost":{json}}}}}"#);
            ProtocolChunk::parse(&data).unwrap().usage.unwrap().cost
        };

        assert_eq!(parse_cost("0.5"), Some(0.5));
        assert_eq!(parse_cost(r#""0.25""#), Some(0.25));
        assert_eq!(parse_cost(r#"{"total_cost": 1.5, "currency": "USD"}"#), Some(1.5));
        assert_eq!(parse_cost(r#""n/a""#), None);
        assert_eq!(parse_cost("null"), None);
    }

    #[test]
    fn missing_total_is_summed() {
        let chunk = ProtocolChunk::parse(r#"{"usage":{"prompt_tokens":3,"completion_tokens":4}}"#).unwrap();
        assert_eq!(chunk.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn odd_token_types_keep_the_chunk() {
        let data = indoc! {r#"
            {
              "choices": [{"delta": {"content": "done"}, "finish_reason": "stop"}],
              "usage": {
                "prompt_tokens": 12.0,
                "completion_tokens": "30",
                "total_tokens": {"value": 42},
                "completion_tokens_details": {"reasoning_tokens": -1}
              }
            }
        "#};

        let chunk = ProtocolChunk::parse(data).unwrap();

        assert_eq!(chunk.text.as_deref(), Some("done"));
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));

        insta::assert_json_snapshot!(chunk.usage, @r#"
        {
          "prompt_tokens": 12,
          "completion_tokens": 30,
          "total_tokens": 42
        }
        "#);
    }

    #[test]
    fn error_payload() {
        let chunk = ProtocolChunk::parse(r#"{"error":{"message":"Upstream overloaded","code":502}}"#).unwrap();
        assert_eq!(chunk.error.as_deref(), Some("Upstream overloaded (code 502)"));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ProtocolChunk::parse("{\"choices\": [").is_err());
        assert!(ProtocolChunk::parse("not json").is_err());
    }

    #[test]
    fn empty_finish_reason_is_ignored() {
        let chunk = ProtocolChunk::parse(r#"{"choices":[{"delta":{},"finish_reason":"","native_finish_reason":"  "}]}"#)
            .unwrap();

        assert_eq!(chunk.finish_reason, None);
        assert_eq!(chunk.native_finish_reason, None);
    }
}
