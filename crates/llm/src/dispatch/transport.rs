use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use config::{EndpointConfig, ProxyConfig};
use futures::{Stream, StreamExt};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use reqwest::Client;
use secrecy::ExposeSecret;

use super::pool::ProxyEntry;
use crate::error::LlmError;

/// Response body delivered as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send>>;

/// Which egress path a request takes.
#[derive(Debug, Clone, Copy)]
pub enum Route<'a> {
    Direct,
    Proxy(&'a ProxyEntry),
}

impl Route<'_> {
    pub fn label(&self) -> &str {
        match self {
            Route::Direct => "direct",
            Route::Proxy(entry) => entry.label(),
        }
    }
}

/// An HTTP response whose headers arrived; the body may still be streaming.
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Read the body into a string, keeping at most `limit` bytes.
    pub async fn text(mut self, limit: usize) -> crate::Result<String> {
        let mut collected = Vec::new();

        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            let room = limit.saturating_sub(collected.len());

            collected.extend_from_slice(&chunk[..chunk.len().min(room)]);

            if collected.len() >= limit {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Sends a serialized chat-completion request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns as soon as the response headers are in.
    async fn send(&self, route: Route<'_>, body: Bytes) -> crate::Result<TransportResponse>;
}

/// HTTPS transport over reqwest, with one connection pool per egress path.
pub struct HttpTransport {
    url: String,
    direct: Client,
    proxied: Vec<Client>,
}

impl HttpTransport {
    pub fn new(endpoint: &EndpointConfig, proxy: &ProxyConfig) -> crate::Result<Self> {
        let headers = default_headers(endpoint)?;

        let direct = client_builder(endpoint, headers.clone()).build().map_err(|e| {
            log::error!("Failed to create HTTP client: {e}");
            LlmError::InternalError(format!("Failed to create HTTP client: {e}"))
        })?;

        let mut proxied = Vec::with_capacity(proxy.pool.len());

        for entry in &proxy.pool {
            let mut reqwest_proxy = reqwest::Proxy::all(entry.url.as_str())
                .map_err(|e| LlmError::InternalError(format!("Invalid proxy {}: {e}", entry.label())))?;

            if let Some(username) = &entry.username {
                let password = entry.password.as_ref().map(|p| p.expose_secret()).unwrap_or_default();
                reqwest_proxy = reqwest_proxy.basic_auth(username, password);
            }

            let client = client_builder(endpoint, headers.clone())
                .proxy(reqwest_proxy)
                .build()
                .map_err(|e| LlmError::InternalError(format!("Failed to create HTTP client for {}: {e}", entry.label())))?;

            proxied.push(client);
        }

        Ok(Self {
            url: endpoint.completions_url(),
            direct,
            proxied,
        })
    }

    fn client(&self, route: Route<'_>) -> crate::Result<&Client> {
        match route {
            Route::Direct => Ok(&self.direct),
            Route::Proxy(entry) => self
                .proxied
                .get(entry.index())
                .ok_or_else(|| LlmError::InternalError(format!("No HTTP client for proxy {}", entry.label()))),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, route: Route<'_>, body: Bytes) -> crate::Result<TransportResponse> {
        let response = self
            .client(route)?
            .post(&self.url)
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("Failed to send request via {}: {e}", route.label())))?;

        let status = response.status();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| LlmError::ConnectionError(format!("Failed to read response body: {e}"))));

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}

fn default_headers(endpoint: &EndpointConfig) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

    if let Some(key) = &endpoint.api_key {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
            .map_err(|_| LlmError::InvalidRequest("API key contains invalid header characters".to_string()))?;

        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
    }

    Ok(headers)
}

fn client_builder(endpoint: &EndpointConfig, headers: HeaderMap) -> reqwest::ClientBuilder {
    // No request timeout here; the idle guard and the attempt deadline bound streams.
    Client::builder()
        .connect_timeout(endpoint.connect_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .user_agent(endpoint.user_agent.clone())
        .default_headers(headers)
}
