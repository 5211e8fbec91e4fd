//! A scripted OpenAI-compatible chat-completion server.

use std::{
    collections::VecDeque,
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::{StreamExt, stream};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// How the server answers one request.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// An event stream of `data:` frames.
    Stream {
        frames: Vec<String>,
        /// Pause before every frame.
        delay: Duration,
        /// Keep the connection open without sending anything after the frames.
        hang: bool,
    },
    /// A non-streaming error answer.
    Status(u16, String),
}

impl ScriptedReply {
    /// Stream the given text fragments, a `stop` finish reason, usage and `[DONE]`.
    pub fn text(fragments: &[&str]) -> Self {
        let mut frames: Vec<_> = fragments
            .iter()
            .map(|fragment| content_frame(fragment, None))
            .collect();

        frames.push(
            r#"{"model":"mock/model","choices":[{"index":0,"delta":{},"finish_reason":"stop","native_finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15,"cost":0.0001}}"#
                .to_string(),
        );
        frames.push("[DONE]".to_string());

        Self::frames(frames)
    }

    pub fn frames(frames: Vec<String>) -> Self {
        Self::Stream {
            frames,
            delay: Duration::ZERO,
            hang: false,
        }
    }

    /// Send the frames, then stall forever.
    pub fn stalled(frames: Vec<String>) -> Self {
        Self::Stream {
            frames,
            delay: Duration::ZERO,
            hang: true,
        }
    }

    pub fn with_delay(self, pause: Duration) -> Self {
        match self {
            Self::Stream { frames, hang, .. } => Self::Stream {
                frames,
                delay: pause,
                hang,
            },
            other => other,
        }
    }
}

/// A `data:` payload carrying one text fragment.
pub fn content_frame(text: &str, finish_reason: Option<&str>) -> String {
    let finish_reason = match finish_reason {
        Some(reason) => serde_json::Value::String(reason.to_string()),
        None => serde_json::Value::Null,
    };

    serde_json::json!({
        "model": "mock/model",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": finish_reason}]
    })
    .to_string()
}

/// A request the server received.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Default)]
struct MockState {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ReceivedRequest>>,
}

/// Mock server answering `POST /v1/chat/completions` from a script.
///
/// Replies are consumed in order; once the script is exhausted every request
/// gets a short "Hello from mock" stream.
pub struct TestOpenAIServer {
    address: SocketAddr,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl TestOpenAIServer {
    pub async fn start() -> Self {
        Self::with_script(Vec::new()).await
    }

    pub async fn with_script(replies: Vec<ScriptedReply>) -> Self {
        let state = Arc::new(MockState {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move { signal.cancelled().await });

            if let Err(e) = server.await {
                log::error!("Mock chat-completion server failed: {e}");
            }
        });

        Self {
            address,
            state,
            shutdown,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Base URL to use as `endpoint.base_url`.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.address)
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for TestOpenAIServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn chat_completions(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    state
        .requests
        .lock()
        .unwrap()
        .push(ReceivedRequest { authorization, body });

    let reply = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| ScriptedReply::text(&["Hello", " from", " mock"]));

    match reply {
        ScriptedReply::Status(status, message) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = serde_json::json!({ "error": { "message": message, "code": status.as_u16() } });

            (status, body.to_string()).into_response()
        }
        ScriptedReply::Stream { frames, delay, hang } => {
            let frames = stream::iter(frames).then(move |frame| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                Ok::<_, Infallible>(Bytes::from(format!("data: {frame}\n\n")))
            });

            let preamble = stream::once(async { Ok::<_, Infallible>(Bytes::from_static(b": MOCK PROCESSING\n\n")) });

            let body = if hang {
                Body::from_stream(preamble.chain(frames).chain(stream::pending()))
            } else {
                Body::from_stream(preamble.chain(frames))
            };

            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .unwrap()
        }
    }
}
