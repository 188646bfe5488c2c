//! Two-phase convergence detection.
//!
//! Phase 1 waits for the controller to acknowledge a change: the resource
//! goes out of sync, or its observed revision already equals the target.
//! Phase 2 waits until sync, health, replica count and revision all match in
//! a single sample. Each phase has its own cadence and deadline, and both
//! always end with a [`PhaseResult`], including on cancellation.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::Error;
use crate::probe::StatusProbe;
use crate::ticker::{Bounded, Tick, Ticker};
use crate::types::{HealthState, Phase, PhaseResult, Status, SyncState, WatchTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    pub detection_interval: Duration,
    pub detection_timeout: Duration,
    pub convergence_interval: Duration,
    pub convergence_timeout: Duration,
    /// How long health must hold after a synced-but-unhealthy sample
    pub settle_window: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_secs(1),
            detection_timeout: Duration::from_secs(30),
            convergence_interval: Duration::from_secs(2),
            convergence_timeout: Duration::from_secs(120),
            settle_window: Duration::from_secs(15),
        }
    }
}

/// Terminal states of one monitoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchState {
    Converged,
    TimedOut(Phase),
}

/// Combined result of both phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchOutcome {
    pub detection: PhaseResult,
    /// Absent when detection timed out
    pub convergence: Option<PhaseResult>,
    pub fully_converged: bool,
}

impl WatchOutcome {
    pub fn state(&self) -> WatchState {
        if self.fully_converged {
            return WatchState::Converged;
        }
        match &self.convergence {
            None => WatchState::TimedOut(Phase::Detection),
            Some(_) => WatchState::TimedOut(Phase::Convergence),
        }
    }

    /// Phase that did not complete, if any.
    pub fn failed_phase(&self) -> Option<Phase> {
        match self.state() {
            WatchState::TimedOut(phase) => Some(phase),
            _ => None,
        }
    }

    /// The deadline failure of this run. `None` when it converged or was cancelled.
    pub fn timeout_error(&self) -> Option<Error> {
        if self.cancelled() {
            return None;
        }
        let phase = self.failed_phase()?;
        let elapsed = match phase {
            Phase::Detection => self.detection.elapsed,
            Phase::Convergence => self.convergence.as_ref()?.elapsed,
        };
        Some(Error::Timeout { phase, elapsed })
    }

    pub fn last_status(&self) -> &Status {
        self.convergence
            .as_ref()
            .map(|c| &c.final_status)
            .unwrap_or(&self.detection.final_status)
    }

    pub fn cancelled(&self) -> bool {
        self.detection.cancelled || self.convergence.as_ref().is_some_and(|c| c.cancelled)
    }

    pub fn total_elapsed(&self) -> Duration {
        self.detection.elapsed + self.convergence.as_ref().map(|c| c.elapsed).unwrap_or_default()
    }
}

/// Acknowledgement condition of phase 1.
pub fn is_detected(status: &Status, target: &WatchTarget) -> bool {
    status.sync_state.is_pending() || status.revision_matches(&target.target_revision)
}

/// Sync, replicas and revision match, regardless of health.
fn is_aligned(status: &Status, target: &WatchTarget) -> bool {
    status.sync_state == SyncState::Synced
        && status.replicas_match(target.target_replica_count)
        && status.revision_matches(&target.target_revision)
}

/// Full convergence condition of phase 2 for a single sample.
pub fn is_converged(status: &Status, target: &WatchTarget) -> bool {
    is_aligned(status, target) && status.health_state == HealthState::Healthy
}

#[derive(Debug, Clone)]
pub struct PhaseDetector {
    probe: StatusProbe,
    config: DetectorConfig,
    ticker: Ticker,
}

impl PhaseDetector {
    pub fn new(probe: StatusProbe, config: DetectorConfig, ticker: Ticker) -> Self {
        Self {
            probe,
            config,
            ticker,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run detection then convergence for `target`.
    pub async fn watch(&self, target: &WatchTarget) -> WatchOutcome {
        tracing::info!(
            resource = %target.resource_id,
            revision = %target.target_revision,
            replicas = target.target_replica_count,
            "waiting for the controller to detect the change"
        );
        let detection = self.await_detection(target).await;
        if detection.timed_out {
            tracing::warn!(
                resource = %target.resource_id,
                phase = %Phase::Detection,
                elapsed_secs = detection.elapsed_seconds(),
                cancelled = detection.cancelled,
                status = %detection.final_status,
                "change was not detected"
            );
            return WatchOutcome {
                detection,
                convergence: None,
                fully_converged: false,
            };
        }
        tracing::info!(
            resource = %target.resource_id,
            phase = %Phase::Detection,
            elapsed_secs = detection.elapsed_seconds(),
            "change detected, waiting for convergence"
        );

        let convergence = self.await_convergence(target).await;
        let fully_converged = !convergence.timed_out;
        if fully_converged {
            tracing::info!(
                resource = %target.resource_id,
                phase = %Phase::Convergence,
                elapsed_secs = convergence.elapsed_seconds(),
                "converged"
            );
        } else {
            tracing::warn!(
                resource = %target.resource_id,
                phase = %Phase::Convergence,
                elapsed_secs = convergence.elapsed_seconds(),
                cancelled = convergence.cancelled,
                status = %convergence.final_status,
                "did not converge"
            );
        }
        WatchOutcome {
            detection,
            convergence: Some(convergence),
            fully_converged,
        }
    }

    async fn await_detection(&self, target: &WatchTarget) -> PhaseResult {
        let start = self.ticker.now();
        let deadline = start + self.config.detection_timeout;
        let mut last = Status::unknown();

        loop {
            if self.ticker.is_cancelled() {
                return finish(Phase::Detection, start, last, true, true);
            }
            last = match self
                .ticker
                .bounded(self.probe.fetch(&target.resource_id), deadline)
                .await
            {
                Bounded::Ready(status) => status,
                Bounded::Cancelled => return finish(Phase::Detection, start, last, true, true),
                Bounded::DeadlineReached => {
                    return finish(Phase::Detection, start, last, true, false);
                }
            };
            tracing::debug!(resource = %target.resource_id, status = %last, "detection sample");
            if is_detected(&last, target) {
                return finish(Phase::Detection, start, last, false, false);
            }
            if self.ticker.now() >= deadline {
                return finish(Phase::Detection, start, last, true, false);
            }
            if self
                .ticker
                .wait_until_next(self.config.detection_interval, deadline)
                .await
                == Tick::Cancelled
            {
                return finish(Phase::Detection, start, last, true, true);
            }
        }
    }

    async fn await_convergence(&self, target: &WatchTarget) -> PhaseResult {
        let start = self.ticker.now();
        let deadline = start + self.config.convergence_timeout;
        let mut last = Status::unknown();
        let mut settling = Settle::default();

        loop {
            if self.ticker.is_cancelled() {
                return finish(Phase::Convergence, start, last, true, true);
            }
            last = match self
                .ticker
                .bounded(self.probe.fetch(&target.resource_id), deadline)
                .await
            {
                Bounded::Ready(status) => status,
                Bounded::Cancelled => return finish(Phase::Convergence, start, last, true, true),
                Bounded::DeadlineReached => {
                    return finish(Phase::Convergence, start, last, true, false);
                }
            };
            let now = self.ticker.now();
            tracing::debug!(resource = %target.resource_id, status = %last, "convergence sample");
            if settling.observe(&last, target, now, self.config.settle_window) {
                return finish(Phase::Convergence, start, last, false, false);
            }
            if now >= deadline {
                return finish(Phase::Convergence, start, last, true, false);
            }
            if self
                .ticker
                .wait_until_next(self.config.convergence_interval, deadline)
                .await
                == Tick::Cancelled
            {
                return finish(Phase::Convergence, start, last, true, true);
            }
        }
    }
}

/// Tracks whether health has stabilised.
///
/// Once a sample is aligned but not healthy, the resource is considered to
/// be starting up and a healthy sample only counts after health has held
/// for the settle window.
#[derive(Debug, Default)]
struct Settle {
    starting_up: bool,
    healthy_since: Option<Instant>,
}

impl Settle {
    fn observe(
        &mut self,
        status: &Status,
        target: &WatchTarget,
        now: Instant,
        window: Duration,
    ) -> bool {
        if is_converged(status, target) {
            if !self.starting_up {
                return true;
            }
            let since = *self.healthy_since.get_or_insert(now);
            return now.duration_since(since) >= window;
        }
        self.healthy_since = None;
        if is_aligned(status, target) {
            self.starting_up = true;
        }
        false
    }
}

fn finish(
    phase: Phase,
    start: Instant,
    final_status: Status,
    timed_out: bool,
    cancelled: bool,
) -> PhaseResult {
    PhaseResult {
        phase,
        elapsed: start.elapsed(),
        final_status,
        timed_out,
        cancelled,
    }
}
