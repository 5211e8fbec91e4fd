use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::Stream;
use pin_project::pin_project;
use tokio::time::{Instant, Sleep};

use crate::error::{LlmError, TimeoutKind};

/// Idle-timeout settings for a response byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeout {
    pub timeout: Duration,
    pub enabled: bool,
}

impl IdleTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, enabled: true }
    }

    pub fn disabled() -> Self {
        Self {
            timeout: Duration::ZERO,
            enabled: false,
        }
    }
}

impl From<&config::StreamConfig> for IdleTimeout {
    fn from(config: &config::StreamConfig) -> Self {
        Self {
            timeout: config.idle_timeout,
            enabled: config.idle_timeout_enabled,
        }
    }
}

/// Time of the last observed activity, shared between readers.
///
/// A single word holds the nanoseconds elapsed since the clock was created;
/// updates only ever move it forward.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last.fetch_max(elapsed, Ordering::AcqRel);
    }

    pub fn last_activity(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last.load(Ordering::Acquire))
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a byte stream and fails it once no bytes arrived for longer than the
/// configured timeout. A gap of exactly the timeout still passes.
///
/// The pending read and the deadline are raced directly: a timeout fires even
/// if the underlying stream never wakes up again. After a timeout the guard
/// yields the error once and then ends.
#[pin_project]
pub struct IdleTimeoutGuard<S> {
    #[pin]
    inner: S,
    config: IdleTimeout,
    clock: Arc<ActivityClock>,
    sleep: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl<S> IdleTimeoutGuard<S>
where
    S: Stream<Item = crate::Result<Bytes>>,
{
    pub fn new(inner: S, config: IdleTimeout) -> Self {
        Self::with_clock(inner, config, Arc::new(ActivityClock::new()))
    }

    /// Use a clock shared with other observers of the same connection.
    pub fn with_clock(inner: S, config: IdleTimeout, clock: Arc<ActivityClock>) -> Self {
        clock.touch();

        Self {
            inner,
            config,
            clock,
            sleep: None,
            finished: false,
        }
    }

    pub fn clock(&self) -> Arc<ActivityClock> {
        self.clock.clone()
    }
}

impl<S> Stream for IdleTimeoutGuard<S>
where
    S: Stream<Item = crate::Result<Bytes>>,
{
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.clock.touch();
                return Poll::Ready(Some(Ok(bytes)));
            }
            Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
            Poll::Ready(None) => {
                *this.finished = true;
                return Poll::Ready(None);
            }
            Poll::Pending if !this.config.enabled => return Poll::Pending,
            Poll::Pending => (),
        }

        loop {
            // Fires only once the gap exceeds the timeout.
            let deadline = this.clock.last_activity() + this.config.timeout + Duration::from_nanos(1);

            let sleep = this.sleep.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));

            if sleep.deadline() != deadline {
                sleep.as_mut().reset(deadline);
            }

            if sleep.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }

            // Another reader sharing the clock may have moved the deadline.
            if this.clock.idle_for() > this.config.timeout {
                log::warn!("No response data received for {:?}, aborting stream", this.config.timeout);

                *this.finished = true;
                let error = LlmError::Timeout(TimeoutKind::Idle(this.config.timeout));

                return Poll::Ready(Some(Err(error)));
            }
        }
    }
}
