use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use config::{ProxyConfig, ProxyEntryConfig};
use tokio::time::Instant;

use crate::diagnostics::{Diagnostic, DiagnosticSink};

/// One egress proxy and its health counters.
///
/// Timestamps are stored as milliseconds since the pool was created, plus one,
/// so that zero means "never".
#[derive(Debug)]
pub struct ProxyEntry {
    index: usize,
    label: String,
    config: ProxyEntryConfig,
    failure_count: AtomicU32,
    last_failure: AtomicU64,
    last_success: AtomicU64,
}

impl ProxyEntry {
    fn new(index: usize, config: ProxyEntryConfig) -> Self {
        Self {
            index,
            label: config.label(),
            config,
            failure_count: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
        }
    }

    /// Position of the proxy in the configured pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Address without credentials, for logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &ProxyEntryConfig {
        &self.config
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }
}

/// The proxies requests may leave through, with failure tracking.
///
/// A proxy whose failure count reached the threshold is left out of rotation
/// until `cooldown` has passed since its last failure; it then starts over
/// with a clean count.
#[derive(Debug)]
pub struct ProxyPool {
    origin: Instant,
    entries: Vec<ProxyEntry>,
    direct: bool,
    failure_threshold: u32,
    cooldown: Duration,
}

impl ProxyPool {
    pub fn new(config: &ProxyConfig) -> Self {
        let entries = config
            .pool
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, entry)| ProxyEntry::new(index, entry))
            .collect();

        Self {
            origin: Instant::now(),
            entries,
            direct: config.direct,
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ProxyEntry] {
        &self.entries
    }

    /// Whether requests may bypass the pool while it has no entries.
    pub fn allows_direct(&self) -> bool {
        self.direct && self.entries.is_empty()
    }

    /// Proxies currently in rotation, healthiest first.
    ///
    /// Entries with equal failure counts keep their configured order.
    pub fn candidates(&self, diagnostics: &DiagnosticSink) -> Vec<&ProxyEntry> {
        let now = self.now_millis();

        let mut candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| self.in_rotation(entry, now, diagnostics))
            .collect();

        candidates.sort_by_key(|entry| entry.failure_count());
        candidates
    }

    /// Whether `entry` may be used right now.
    ///
    /// Failures recorded by concurrent dispatches since the candidate list was
    /// built count here.
    pub fn is_available(&self, entry: &ProxyEntry, diagnostics: &DiagnosticSink) -> bool {
        self.in_rotation(entry, self.now_millis(), diagnostics)
    }

    pub fn record_failure(&self, entry: &ProxyEntry) -> u32 {
        entry.last_failure.store(self.now_millis(), Ordering::Release);
        entry.failure_count.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn record_success(&self, entry: &ProxyEntry) {
        entry.failure_count.store(0, Ordering::Release);
        entry.last_failure.store(0, Ordering::Release);
        entry.last_success.store(self.now_millis(), Ordering::Release);
    }

    pub fn last_failure(&self, entry: &ProxyEntry) -> Option<Instant> {
        self.instant(entry.last_failure.load(Ordering::Acquire))
    }

    pub fn last_success(&self, entry: &ProxyEntry) -> Option<Instant> {
        self.instant(entry.last_success.load(Ordering::Acquire))
    }

    fn in_rotation(&self, entry: &ProxyEntry, now: u64, diagnostics: &DiagnosticSink) -> bool {
        if entry.failure_count() < self.failure_threshold {
            return true;
        }

        let last_failure = entry.last_failure.load(Ordering::Acquire);
        let cooldown = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX);

        if now.saturating_sub(last_failure) < cooldown {
            return false;
        }

        // Only the caller that wins the reset reports the restoration.
        let restored = entry
            .last_failure
            .compare_exchange(last_failure, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if restored {
            entry.failure_count.store(0, Ordering::Release);
            diagnostics.emit(Diagnostic::ProxyRestored {
                proxy: entry.label.clone(),
            });
        }

        true
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis())
            .unwrap_or(u64::MAX - 1)
            .saturating_add(1)
    }

    fn instant(&self, millis: u64) -> Option<Instant> {
        (millis > 0).then(|| self.origin + Duration::from_millis(millis - 1))
    }
}
