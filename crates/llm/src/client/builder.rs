use std::sync::Arc;

use config::Config;

use crate::{
    client::LlmClient,
    diagnostics::DiagnosticSink,
    dispatch::{HttpTransport, ProxyDispatcher, ProxyPool, Transport},
    stream::{IdleTimeout, StreamDecoder},
};

/// Configures and creates an [`LlmClient`].
pub struct LlmClientBuilder<'a> {
    config: &'a Config,
    transport: Option<Arc<dyn Transport>>,
    diagnostics: DiagnosticSink,
}

impl<'a> LlmClientBuilder<'a> {
    pub(crate) fn new(config: &'a Config) -> Self {
        Self {
            config,
            transport: None,
            diagnostics: DiagnosticSink::disabled(),
        }
    }

    /// Send requests through `transport` instead of HTTPS.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn diagnostics(mut self, diagnostics: DiagnosticSink) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn build(self) -> crate::Result<LlmClient> {
        let config = self.config;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.endpoint, &config.proxy)?),
        };

        log::debug!(
            "Initializing chat-completion client for {} with {} proxies",
            config.endpoint.completions_url(),
            config.proxy.pool.len()
        );

        let dispatcher = ProxyDispatcher::new(
            ProxyPool::new(&config.proxy),
            transport,
            config.proxy.max_concurrency,
            self.diagnostics.clone(),
        );

        let decoder = StreamDecoder::new(config.stream.loop_threshold, config.stream.refusal_message.clone())
            .with_diagnostics(self.diagnostics.clone());

        Ok(LlmClient {
            dispatcher,
            decoder,
            idle_timeout: IdleTimeout::from(&config.stream),
            retry: config.retry.clone(),
            excerpt_limit: config.diagnostics.excerpt_limit,
            diagnostics: self.diagnostics,
        })
    }
}
