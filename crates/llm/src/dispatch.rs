//! Egress selection: which proxy a request leaves through, and how many
//! requests may be in flight at once.

#[cfg(test)]
pub(crate) mod mock;
mod pool;
mod transport;

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use tokio::sync::Semaphore;

pub use pool::{ProxyEntry, ProxyPool};
pub use transport::{ByteStream, HttpTransport, Route, Transport, TransportResponse};

use crate::{
    diagnostics::{Diagnostic, DiagnosticSink},
    error::LlmError,
};

/// A response together with the proxy it came through.
#[derive(Debug)]
pub struct Dispatched {
    pub response: TransportResponse,
    /// Label of the proxy used, `None` for a direct connection.
    pub proxy: Option<String>,
}

/// Sends requests through the healthiest available proxy, falling back to the
/// next one on failure.
///
/// A request counts as successful for a proxy once response headers arrive,
/// whatever the HTTP status, except `407 Proxy Authentication Required`.
pub struct ProxyDispatcher {
    pool: ProxyPool,
    transport: Arc<dyn Transport>,
    slots: Semaphore,
    diagnostics: DiagnosticSink,
}

impl ProxyDispatcher {
    pub fn new(
        pool: ProxyPool,
        transport: Arc<dyn Transport>,
        max_concurrency: usize,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self {
            pool,
            transport,
            slots: Semaphore::new(max_concurrency.max(1)),
            diagnostics,
        }
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    /// Send `body`, waiting for a free slot first.
    ///
    /// Fails with [`LlmError::NoProxyAvailable`] without sending anything when
    /// the pool is empty or every proxy is cooling down, and with
    /// [`LlmError::ProxiesExhausted`] when every candidate failed. An empty pool
    /// configured for direct egress sends the request straight to the endpoint.
    pub async fn dispatch(&self, body: Bytes) -> crate::Result<Dispatched> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| LlmError::InternalError("dispatch slots were closed".to_string()))?;

        if self.pool.allows_direct() {
            let response = self.transport.send(Route::Direct, body).await?;
            return Ok(Dispatched { response, proxy: None });
        }

        if self.pool.is_empty() {
            log::warn!("No proxies configured, refusing to send the request");
            return Err(LlmError::NoProxyAvailable);
        }

        let candidates = self.pool.candidates(&self.diagnostics);

        if candidates.is_empty() {
            log::warn!("All {} proxies are cooling down", self.pool.entries().len());
            return Err(LlmError::NoProxyAvailable);
        }

        let mut attempted = 0;
        let mut last_error = None;

        for entry in candidates {
            if !self.pool.is_available(entry, &self.diagnostics) {
                log::debug!("Skipping {}, blacklisted by a concurrent request", entry.label());
                continue;
            }

            attempted += 1;

            let result = match self.transport.send(Route::Proxy(entry), body.clone()).await {
                Ok(response) if response.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED => Err(
                    LlmError::ConnectionError(format!("Proxy {} rejected its credentials", entry.label())),
                ),
                other => other,
            };

            match result {
                Ok(response) => {
                    self.pool.record_success(entry);
                    log::debug!("Request dispatched via {}", entry.label());

                    return Ok(Dispatched {
                        response,
                        proxy: Some(entry.label().to_string()),
                    });
                }
                Err(error) => {
                    let failure_count = self.pool.record_failure(entry);

                    self.diagnostics.emit(Diagnostic::ProxyFailed {
                        proxy: entry.label().to_string(),
                        failure_count,
                        error: error.to_string(),
                    });

                    last_error = Some(error);
                }
            }
        }

        let Some(source) = last_error else {
            return Err(LlmError::NoProxyAvailable);
        };

        Err(LlmError::ProxiesExhausted {
            attempted,
            source: Box::new(source),
        })
    }
}
