use std::{fmt, time::Duration};

use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors raised while sending a chat-completion request and consuming its stream.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The caller supplied an invalid request. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network or connection error from the transport.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Every proxy in the pool is blacklisted, or the pool is empty.
    #[error("No proxy available: the pool is empty or every proxy is cooling down")]
    NoProxyAvailable,

    /// Every candidate proxy failed; carries the last underlying error.
    #[error("All {attempted} proxies failed, last error: {source}")]
    ProxiesExhausted {
        attempted: usize,
        #[source]
        source: Box<LlmError>,
    },

    /// The stream stalled or the attempt ran past its deadline.
    #[error("{0}")]
    Timeout(TimeoutKind),

    /// The same text fragment kept repeating; the generation is degenerate.
    #[error("Generation loop detected: fragment {fragment:?} repeated {repeats} times")]
    LoopDetected { fragment: String, repeats: u32 },

    /// The provider reported an error inside the event stream.
    #[error("Stream error from provider: {0}")]
    StreamError(String),

    /// The stream ended without an accepted finish reason.
    #[error("Incomplete generation (finish reason: {}), last line: {}", .finish_reason.as_deref().unwrap_or("none"), .last_line.as_deref().unwrap_or("none"))]
    IncompleteGeneration {
        finish_reason: Option<String>,
        last_line: Option<String>,
    },

    /// The stream finished but produced neither text nor images.
    #[error("Empty response: the model produced no text and no images")]
    EmptyResponse,

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The attempt budget ran out; wraps the most recent failure.
    #[error("Request failed after {attempts} attempts: {source}")]
    AttemptsExhausted {
        attempts: u32,
        excerpt: Excerpt,
        #[source]
        source: Box<LlmError>,
    },

    /// Client construction or an internal invariant failed.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LlmError {
    /// Whether another attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest(_) | Self::Cancelled | Self::InternalError(_) | Self::AttemptsExhausted { .. } => false,
            Self::ConnectionError(_)
            | Self::ProviderApiError { .. }
            | Self::NoProxyAvailable
            | Self::ProxiesExhausted { .. }
            | Self::Timeout(_)
            | Self::LoopDetected { .. }
            | Self::StreamError(_)
            | Self::IncompleteGeneration { .. }
            | Self::EmptyResponse => true,
        }
    }

    /// Short machine-readable category of the error.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "validation_error",
            Self::ConnectionError(_)
            | Self::ProviderApiError { .. }
            | Self::NoProxyAvailable
            | Self::ProxiesExhausted { .. }
            | Self::StreamError(_) => "transport_error",
            Self::Timeout(_) => "timeout_error",
            Self::LoopDetected { .. } => "loop_detected_error",
            Self::IncompleteGeneration { .. } => "incomplete_generation_error",
            Self::EmptyResponse => "empty_response_error",
            Self::Cancelled => "cancelled",
            Self::AttemptsExhausted { source, .. } => source.error_type(),
            Self::InternalError(_) => "internal_error",
        }
    }

    /// The failure that ended the request, looking through `AttemptsExhausted`.
    pub fn root(&self) -> &LlmError {
        match self {
            Self::AttemptsExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status of a provider error, if any.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::ProviderApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No bytes arrived within the idle timeout.
    Idle(Duration),
    /// The whole attempt exceeded its deadline.
    Deadline(Duration),
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle(timeout) => write!(f, "Idle timeout: no data received for {timeout:?}"),
            Self::Deadline(timeout) => write!(f, "Attempt deadline of {timeout:?} exceeded"),
        }
    }
}

/// Truncated request/response text attached to a final failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Excerpt {
    /// Last characters of the serialized request body.
    pub request_tail: String,
    /// First characters of the response body or the last stream line, if any.
    pub response: Option<String>,
}

impl Excerpt {
    pub(crate) fn new(request_body: &[u8], response: Option<&str>, limit: usize) -> Self {
        let request = String::from_utf8_lossy(request_body);

        Self {
            request_tail: tail(&request, limit).to_string(),
            response: response.map(|text| head(text, limit).to_string()),
        }
    }
}

/// At most `limit` characters from the start of `text`.
pub(crate) fn head(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// At most `limit` characters from the end of `text`.
pub(crate) fn tail(text: &str, limit: usize) -> &str {
    if limit == 0 {
        return "";
    }

    match text.char_indices().rev().nth(limit - 1) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}
