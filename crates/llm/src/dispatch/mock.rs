use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use config::{ProxyConfig, ProxyEntryConfig};
use futures::{StreamExt, stream};
use http::StatusCode;
use url::Url;

use super::transport::{Route, Transport, TransportResponse};
use crate::error::LlmError;

pub(crate) fn proxy_config(count: usize, failure_threshold: u32, cooldown: Duration) -> ProxyConfig {
    ProxyConfig {
        direct: false,
        max_concurrency: 5,
        failure_threshold,
        cooldown,
        pool: (0..count)
            .map(|i| ProxyEntryConfig {
                url: Url::parse(&format!("http://10.0.0.{}:3128", i + 1)).unwrap(),
                username: None,
                password: None,
            })
            .collect(),
    }
}

/// A scripted answer of [`MockTransport`].
pub(crate) enum Reply {
    /// 200 with the given event-stream body.
    Sse(String),
    /// 200 whose body starts only after the delay.
    Delayed(Duration, String),
    /// 200 sending the body, then nothing ever again.
    Stalled(String),
    Status(u16, String),
    Error(LlmError),
}

/// In-memory transport answering from a script, one reply per call.
///
/// Calls through a proxy listed in `failing` fail without consuming a reply.
/// Once the script runs out every call answers with an empty 200.
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    failing: HashSet<usize>,
    latency: Duration,
    proxy_latency: HashMap<usize, Duration>,
    calls: Mutex<Vec<Option<usize>>>,
    bodies: Mutex<Vec<Bytes>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn failing_proxies(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing = indices.into_iter().collect();
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Latency for calls through the proxy at `index`, in place of the default.
    pub fn proxy_latency(mut self, index: usize, latency: Duration) -> Self {
        self.proxy_latency.insert(index, latency);
        self
    }

    /// Routes taken so far, `None` for direct calls.
    pub fn calls(&self) -> Vec<Option<usize>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, route: Route<'_>, body: Bytes) -> crate::Result<TransportResponse> {
        let index = match route {
            Route::Direct => None,
            Route::Proxy(entry) => Some(entry.index()),
        };

        self.calls.lock().unwrap().push(index);
        self.bodies.lock().unwrap().push(body);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = index
            .and_then(|index| self.proxy_latency.get(&index).copied())
            .unwrap_or(self.latency);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if index.is_some_and(|index| self.failing.contains(&index)) {
            return Err(LlmError::ConnectionError("proxy connection refused".to_string()));
        }

        let reply = self.replies.lock().unwrap().pop_front();

        match reply {
            None => Ok(response(StatusCode::OK, String::new())),
            Some(Reply::Sse(sse)) => Ok(response(StatusCode::OK, sse)),
            Some(Reply::Delayed(delay, sse)) => {
                let body = stream::once(async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, LlmError>(Bytes::from(sse))
                });

                Ok(TransportResponse {
                    status: StatusCode::OK,
                    body: Box::pin(body),
                })
            }
            Some(Reply::Stalled(sse)) => {
                let body = stream::once(async move { Ok::<_, LlmError>(Bytes::from(sse)) }).chain(stream::pending());

                Ok(TransportResponse {
                    status: StatusCode::OK,
                    body: Box::pin(body),
                })
            }
            Some(Reply::Status(status, body)) => {
                let status = StatusCode::from_u16(status).unwrap();
                Ok(response(status, body))
            }
            Some(Reply::Error(error)) => Err(error),
        }
    }
}

fn response(status: StatusCode, body: String) -> TransportResponse {
    TransportResponse {
        status,
        body: Box::pin(stream::iter(vec![Ok::<_, LlmError>(Bytes::from(body))])),
    }
}
