use std::time::Duration;

use eventsource_stream::{Event, EventStreamError};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::{
    diagnostics::{Diagnostic, DiagnosticSink},
    error::{LlmError, head},
    protocol::ProtocolChunk,
    response::{AccumulatedResponse, FinishReason},
};

const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound for reading the leftovers of a stream after `[DONE]`.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Characters of a malformed line kept in diagnostics.
const MALFORMED_LINE_LIMIT: usize = 200;

/// Incremental output forwarded to a caller while the response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// A text fragment, in arrival order.
    Text(String),
    /// A previous attempt failed; text received so far is void and the
    /// response is streamed again from the start.
    Restart { attempt: u32 },
}

pub type DeltaSender = mpsc::UnboundedSender<StreamDelta>;

/// Turns a server-sent event stream of chat-completion chunks into one
/// [`AccumulatedResponse`].
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    loop_threshold: u32,
    refusal_message: String,
    diagnostics: DiagnosticSink,
}

impl StreamDecoder {
    /// `loop_threshold` of zero disables loop detection.
    pub fn new(loop_threshold: u32, refusal_message: impl Into<String>) -> Self {
        Self {
            loop_threshold,
            refusal_message: refusal_message.into(),
            diagnostics: DiagnosticSink::disabled(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticSink) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Consume `events` until `[DONE]` or the end of the stream.
    ///
    /// The returned response is not validated: callers decide whether its
    /// finish reason and content are acceptable.
    pub async fn decode<S>(&self, events: S, deltas: Option<&DeltaSender>) -> crate::Result<AccumulatedResponse>
    where
        S: Stream<Item = Result<Event, EventStreamError<LlmError>>>,
    {
        let mut last_line = None;
        self.decode_tracking(events, deltas, &mut last_line).await
    }

    /// Like [`decode`](Self::decode), also storing every data line in
    /// `last_line` as it arrives, so the line survives a failed or abandoned
    /// decode.
    pub async fn decode_tracking<S>(
        &self,
        events: S,
        deltas: Option<&DeltaSender>,
        last_line: &mut Option<String>,
    ) -> crate::Result<AccumulatedResponse>
    where
        S: Stream<Item = Result<Event, EventStreamError<LlmError>>>,
    {
        let mut events = std::pin::pin!(events);
        let mut state = DecodeState::default();

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(EventStreamError::Transport(error)) => return Err(error),
                Err(error) => return Err(LlmError::StreamError(format!("Malformed event stream: {error}"))),
            };

            let data = event.data.trim();

            if data.is_empty() {
                continue;
            }

            if data == DONE_SENTINEL {
                log::debug!("Received end of stream marker");

                if tokio::time::timeout(DRAIN_GRACE, drain(&mut events)).await.is_err() {
                    log::debug!("Stream kept sending after the end marker, giving up on draining it");
                }

                break;
            }

            *last_line = Some(data.to_string());

            let chunk = match ProtocolChunk::parse(data) {
                Ok(chunk) => chunk,
                Err(error) => {
                    self.diagnostics.emit(Diagnostic::MalformedChunk {
                        line: head(data, MALFORMED_LINE_LIMIT).to_string(),
                        error: error.to_string(),
                    });

                    continue;
                }
            };

            self.apply(&mut state, chunk, deltas)?;
        }

        state.response.last_line = last_line.clone();

        Ok(self.finish(state))
    }

    fn apply(&self, state: &mut DecodeState, chunk: ProtocolChunk<'_>, deltas: Option<&DeltaSender>) -> crate::Result<()> {
        if let Some(message) = chunk.error {
            return Err(LlmError::StreamError(message));
        }

        let mut completes = false;

        for reason in [&chunk.finish_reason, &chunk.native_finish_reason].into_iter().flatten() {
            match FinishReason::parse(reason) {
                FinishReason::Stop => completes = true,
                FinishReason::ContentFilter => state.refused = true,
                _ => (),
            }
        }

        let response = &mut state.response;

        if let Some(model) = chunk.model {
            response.model = Some(model.into_owned());
        }

        if let Some(reason) = &chunk.finish_reason {
            response.finish_reason = Some(reason.to_string());
        }

        if let Some(reason) = &chunk.native_finish_reason {
            response.native_finish_reason = Some(reason.to_string());
        }

        if chunk.usage.is_some() {
            response.usage = chunk.usage;
        }

        if !chunk.images.is_empty() {
            if completes {
                response.images.extend(chunk.images);
            } else {
                log::debug!("Discarding {} image(s) delivered before completion", chunk.images.len());
            }
        }

        let Some(text) = chunk.text.filter(|text| !text.is_empty()) else {
            return Ok(());
        };

        response.text.push_str(&text);

        if let Some(deltas) = deltas {
            // A dropped receiver only means the caller stopped listening.
            let _ = deltas.send(StreamDelta::Text(text.to_string()));
        }

        if state.last_fragment == text {
            state.repeats += 1;
        } else {
            state.last_fragment = text.into_owned();
            state.repeats = 1;
        }

        if self.loop_threshold > 0 && state.repeats >= self.loop_threshold {
            return Err(LlmError::LoopDetected {
                fragment: head(&state.last_fragment, MALFORMED_LINE_LIMIT).to_string(),
                repeats: state.repeats,
            });
        }

        Ok(())
    }

    fn finish(&self, state: DecodeState) -> AccumulatedResponse {
        let mut response = state.response;

        if state.refused {
            log::warn!(
                "Generation was rejected on content policy grounds (finish reason: {:?}, native: {:?})",
                response.finish_reason,
                response.native_finish_reason
            );

            response.text = self.refusal_message.clone();
            response.finish_reason = Some("stop".to_string());

            return response;
        }

        let native_stop = response
            .native_finish_reason
            .as_deref()
            .is_some_and(|reason| FinishReason::parse(reason) == FinishReason::Stop);

        if response.finish_reason.is_none() && native_stop {
            response.finish_reason = Some("stop".to_string());
        }

        response
    }
}

#[derive(Default)]
struct DecodeState {
    response: AccumulatedResponse,
    last_fragment: String,
    repeats: u32,
    refused: bool,
}

async fn drain<S>(events: &mut S)
where
    S: Stream + Unpin,
{
    let mut leftover = 0usize;

    while events.next().await.is_some() {
        leftover += 1;
    }

    if leftover > 0 {
        log::debug!("Discarded {leftover} event(s) after the end marker");
    }
}
