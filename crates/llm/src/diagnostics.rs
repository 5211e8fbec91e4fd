//! Structured notifications about what happened while serving a request.
//!
//! Diagnostics are side information: they never change the outcome of a
//! request. Every event is logged, and forwarded to an optional channel when
//! the caller wants to observe proxy health or retries.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};

/// A diagnostic event.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Sending through a proxy failed; the proxy's failure count was increased.
    ProxyFailed {
        proxy: String,
        failure_count: u32,
        error: String,
    },
    /// A blacklisted proxy's cooldown elapsed and it re-entered rotation.
    ProxyRestored { proxy: String },
    /// An attempt failed and `retry_in` is set when another one follows.
    AttemptFailed {
        attempt: u32,
        proxy: Option<String>,
        error: String,
        retry_in: Option<Duration>,
    },
    /// A data line of the event stream could not be parsed and was skipped.
    MalformedChunk { line: String, error: String },
}

/// Cloneable handle for emitting [`Diagnostic`] events.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    channel: Option<mpsc::Sender<Diagnostic>>,
}

impl DiagnosticSink {
    /// A sink that only logs.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sink forwarding events to a bounded channel. Events are dropped while
    /// the channel is full.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Diagnostic>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        (Self { channel: Some(sender) }, receiver)
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::ProxyFailed {
                proxy,
                failure_count,
                error,
            } => log::warn!("Proxy {proxy} failed ({failure_count} consecutive failures): {error}"),
            Diagnostic::ProxyRestored { proxy } => log::info!("Proxy {proxy} cooled down and is back in rotation"),
            Diagnostic::AttemptFailed {
                attempt,
                proxy,
                error,
                retry_in,
            } => {
                let via = proxy.as_deref().unwrap_or("direct connection");

                match retry_in {
                    Some(delay) => log::warn!("Attempt {attempt} via {via} failed, retrying in {delay:?}: {error}"),
                    None => log::error!("Attempt {attempt} via {via} failed: {error}"),
                }
            }
            Diagnostic::MalformedChunk { line, error } => log::warn!("Skipping malformed stream chunk ({error}): {line}"),
        }

        let Some(channel) = &self.channel else {
            return;
        };

        if let Err(TrySendError::Full(_)) = channel.try_send(diagnostic) {
            log::debug!("Dropping diagnostic event: channel full");
        }
    }
}
