//! Scheduled ticks with cooperative cancellation.
//!
//! Polling loops suspend here between samples. Time comes from the tokio
//! clock, so tests running with a paused runtime advance it without real
//! delays.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Elapsed,
    Cancelled,
}

/// How a bounded wait on some other future ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounded<T> {
    Ready(T),
    Cancelled,
    DeadlineReached,
}

#[derive(Debug, Clone, Default)]
pub struct Ticker {
    cancel: CancellationToken,
}

impl Ticker {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep for `period`, waking early on cancellation.
    pub async fn wait(&self, period: Duration) -> Tick {
        if self.cancel.is_cancelled() {
            return Tick::Cancelled;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Tick::Cancelled,
            _ = tokio::time::sleep(period) => Tick::Elapsed,
        }
    }

    /// Sleep until the next tick, but never past `deadline`.
    pub async fn wait_until_next(&self, period: Duration, deadline: Instant) -> Tick {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.wait(period.min(remaining)).await
    }

    /// Await `fut`, giving up on cancellation or once `deadline` passes.
    ///
    /// A future that is already complete wins over an expired deadline.
    pub async fn bounded<F: Future>(&self, fut: F, deadline: Instant) -> Bounded<F::Output> {
        if self.cancel.is_cancelled() {
            return Bounded::Cancelled;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Bounded::Cancelled,
            out = fut => Bounded::Ready(out),
            _ = tokio::time::sleep_until(deadline) => Bounded::DeadlineReached,
        }
    }
}
