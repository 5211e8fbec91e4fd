//! A resilient client for streaming chat-completion endpoints.
//!
//! Requests always go out with `stream: true`. The response bytes pass through
//! an [`IdleTimeoutGuard`], are decoded by a [`StreamDecoder`] into an
//! [`AccumulatedResponse`], and [`LlmClient`] retries failed attempts with
//! exponential backoff. Egress goes through a [`ProxyDispatcher`] which tracks
//! proxy health and bounds the number of requests in flight.
//!
//! ```no_run
//! # async fn run(config: &config::Config) -> llm::Result<()> {
//! use llm::{GenerationRequest, LlmClient, Message};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = LlmClient::builder(config).build()?;
//! let request = GenerationRequest::new("openai/gpt-4o-mini", vec![Message::user("Hello!")]);
//!
//! let response = client.send(&request, &CancellationToken::new()).await?;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

mod client;
mod diagnostics;
mod dispatch;
mod error;
mod messages;
mod protocol;
mod request;
mod response;
mod stream;

pub use client::{LlmClient, LlmClientBuilder, SendOptions};
pub use diagnostics::{Diagnostic, DiagnosticSink};
pub use dispatch::{
    ByteStream, Dispatched, HttpTransport, ProxyDispatcher, ProxyEntry, ProxyPool, Route, Transport,
    TransportResponse,
};
pub use error::{Excerpt, LlmError, LlmResult as Result, TimeoutKind};
pub use messages::{ContentPart, GeneratedImage, ImageUrl, Message, MessageContent, Role, normalize_roles};
pub use request::{GenerationRequest, GenerationSettings, ReasoningEffort, ReasoningSettings};
pub use response::{AccumulatedResponse, FinishReason, Usage};
pub use stream::{ActivityClock, DeltaSender, IdleTimeout, IdleTimeoutGuard, StreamDecoder, StreamDelta};
