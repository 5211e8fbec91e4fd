//! The request orchestrator: validation, retries and result checks around one
//! streamed chat completion.

mod backoff;
mod builder;

use std::time::Duration;

use bytes::Bytes;
use config::{Config, RetryConfig};
use eventsource_stream::Eventsource;
use tokio_util::sync::CancellationToken;

pub use builder::LlmClientBuilder;

use self::backoff::backoff_delay;
use crate::{
    diagnostics::{Diagnostic, DiagnosticSink},
    dispatch::{ProxyDispatcher, TransportResponse},
    error::{Excerpt, LlmError, TimeoutKind},
    messages::{Message, normalize_roles},
    protocol::ChatCompletionRequest,
    request::{GenerationRequest, GenerationSettings},
    response::AccumulatedResponse,
    stream::{DeltaSender, IdleTimeout, IdleTimeoutGuard, StreamDecoder, StreamDelta},
};

/// Per-call options of [`LlmClient::send_with_context`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Receives text fragments as they arrive, and a restart marker before a
    /// retry streams the response again.
    pub deltas: Option<DeltaSender>,
}

/// A resilient chat-completion client.
///
/// Every request is streamed, whatever the caller does with the output, so a
/// hung generation is detected by the idle timeout instead of after the
/// whole response was buffered. Failed attempts are retried with exponential
/// backoff until the attempt budget runs out.
pub struct LlmClient {
    pub(crate) dispatcher: ProxyDispatcher,
    pub(crate) decoder: StreamDecoder,
    pub(crate) idle_timeout: IdleTimeout,
    pub(crate) retry: RetryConfig,
    pub(crate) excerpt_limit: usize,
    pub(crate) diagnostics: DiagnosticSink,
}

/// Bookkeeping for one attempt.
#[derive(Debug, Default)]
struct Attempt {
    index: u32,
    proxy: Option<String>,
    /// Start of the error body or the last stream line, for the final excerpt.
    response: Option<String>,
    next_delay: Option<Duration>,
}

impl LlmClient {
    pub fn builder(config: &Config) -> LlmClientBuilder<'_> {
        LlmClientBuilder::new(config)
    }

    pub fn proxy_dispatcher(&self) -> &ProxyDispatcher {
        &self.dispatcher
    }

    /// Send a request and wait for the complete response.
    pub async fn send(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> crate::Result<AccumulatedResponse> {
        self.send_with_context(&request.messages, &request.settings, cancel, SendOptions::default())
            .await
    }

    /// Send `messages` with `settings` and return the accumulated response.
    ///
    /// Fails fast on invalid input and on cancellation. Any other failure is
    /// retried; once the attempt budget is spent the last error is returned
    /// inside [`LlmError::AttemptsExhausted`].
    pub async fn send_with_context(
        &self,
        messages: &[Message],
        settings: &GenerationSettings,
        cancel: &CancellationToken,
        options: SendOptions,
    ) -> crate::Result<AccumulatedResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidRequest("at least one message is required".to_string()));
        }

        let settings = settings.validated()?;
        let messages = normalize_roles(messages);

        let body = Bytes::from(ChatCompletionRequest::new(&messages, &settings).to_body()?);
        let max_attempts = self.retry.max_attempts.max(1);

        log::debug!(
            "Sending chat completion for model {} with {} messages",
            settings.model,
            messages.len()
        );

        for index in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            if index > 1
                && let Some(deltas) = &options.deltas
            {
                let _ = deltas.send(StreamDelta::Restart { attempt: index });
            }

            let mut attempt = Attempt {
                index,
                ..Default::default()
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                result = tokio::time::timeout(self.retry.attempt_timeout, self.attempt(&mut attempt, body.clone(), &settings, options.deltas.as_ref())) => {
                    result.unwrap_or(Err(LlmError::Timeout(TimeoutKind::Deadline(self.retry.attempt_timeout))))
                }
            };

            let error = match result {
                Ok(response) => {
                    log::debug!("Chat completion finished after {index} attempt(s)");
                    return Ok(response);
                }
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => error,
            };

            if index < max_attempts {
                attempt.next_delay = Some(backoff_delay(index, self.retry.backoff_base, self.retry.backoff_max));
            }

            self.diagnostics.emit(Diagnostic::AttemptFailed {
                attempt: index,
                proxy: attempt.proxy.clone(),
                error: error.to_string(),
                retry_in: attempt.next_delay,
            });

            let Some(delay) = attempt.next_delay else {
                return Err(LlmError::AttemptsExhausted {
                    attempts: index,
                    excerpt: Excerpt::new(&body, attempt.response.as_deref(), self.excerpt_limit),
                    source: Box::new(error),
                });
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => (),
            }
        }

        Err(LlmError::InternalError("attempt loop ended without a result".to_string()))
    }

    async fn attempt(
        &self,
        attempt: &mut Attempt,
        body: Bytes,
        settings: &GenerationSettings,
        deltas: Option<&DeltaSender>,
    ) -> crate::Result<AccumulatedResponse> {
        let dispatched = self.dispatcher.dispatch(body).await?;
        attempt.proxy = dispatched.proxy;

        let TransportResponse { status, body } = dispatched.response;
        let body = IdleTimeoutGuard::new(body, self.idle_timeout);

        if !status.is_success() {
            let response = TransportResponse {
                status,
                body: Box::pin(body),
            };

            let message = response
                .text(self.excerpt_limit)
                .await
                .unwrap_or_else(|e| format!("failed to read error body: {e}"));

            log::error!("Chat completion API error ({status}) on attempt {}: {message}", attempt.index);
            attempt.response = Some(message.clone());

            return Err(LlmError::ProviderApiError {
                status: status.as_u16(),
                message,
            });
        }

        let mut response = self
            .decoder
            .decode_tracking(body.eventsource(), deltas, &mut attempt.response)
            .await?;

        if response.model.is_none() {
            response.model = Some(settings.model.clone());
        }

        if !response.finish().is_some_and(|reason| reason.is_accepted()) {
            return Err(LlmError::IncompleteGeneration {
                finish_reason: response.finish_reason.or(response.native_finish_reason),
                last_line: response.last_line,
            });
        }

        if response.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(response)
    }
}
