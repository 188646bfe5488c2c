//! Retrying executor with doubling backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, FailureKind};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles every retry
    pub initial_delay: Duration,
    /// Also retry `TransientOther` failures
    pub retry_transient_other: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            retry_transient_other: false,
        }
    }
}

impl RetryConfig {
    /// Upper bound on wall-clock time spent sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        let factor = 2u32
            .checked_pow(self.max_attempts)
            .map(|f| f - 1)
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Progress of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub next_delay: Duration,
    pub last_error: Option<String>,
}

impl RetryState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            attempt: 0,
            next_delay: initial_delay,
            last_error: None,
        }
    }

    fn advance_delay(&mut self) {
        self.next_delay = self.next_delay.saturating_mul(2);
    }
}

/// A successful value plus the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// The original error of the last attempt, with its classification.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub operation: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed ({}) after {} attempt(s): {}",
            self.operation, self.kind, self.attempts, self.error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryFailure<E> {}

impl<E> RetryFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Erase a typed error so the failure converts into [`Error`].
    pub fn into_anyhow(self) -> RetryFailure<anyhow::Error> {
        RetryFailure {
            operation: self.operation,
            kind: self.kind,
            attempts: self.attempts,
            error: anyhow::Error::new(self.error),
        }
    }
}

impl From<RetryFailure<anyhow::Error>> for Error {
    fn from(failure: RetryFailure<anyhow::Error>) -> Self {
        match failure.kind {
            FailureKind::TransientLock => Error::TransientLock {
                operation: failure.operation,
                attempts: failure.attempts,
                source: failure.error,
            },
            FailureKind::TransientOther => Error::TransientNetwork {
                operation: failure.operation,
                attempts: failure.attempts,
                source: failure.error,
            },
            FailureKind::Terminal => Error::Terminal(
                failure
                    .error
                    .context(format!("{} failed", failure.operation)),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryingExecutor {
    config: RetryConfig,
}

impl RetryingExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `action` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    ///
    /// `classify` returning `None` is treated as terminal.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        operation: &str,
        mut action: F,
        classify: C,
    ) -> Result<Attempted<T>, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Option<FailureKind>,
        E: fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = RetryState::new(self.config.initial_delay);

        loop {
            state.attempt += 1;
            let error = match action().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        tracing::info!(
                            operation,
                            attempts = state.attempt,
                            "succeeded after retry"
                        );
                    }
                    return Ok(Attempted {
                        value,
                        attempts: state.attempt,
                    });
                }
                Err(error) => error,
            };

            let kind = classify(&error).unwrap_or(FailureKind::Terminal);
            let retryable = match kind {
                FailureKind::TransientLock => true,
                FailureKind::TransientOther => self.config.retry_transient_other,
                FailureKind::Terminal => false,
            };

            if !retryable || state.attempt >= max_attempts {
                tracing::warn!(
                    operation,
                    attempts = state.attempt,
                    %kind,
                    error = %error,
                    "giving up"
                );
                return Err(RetryFailure {
                    operation: operation.to_string(),
                    kind,
                    attempts: state.attempt,
                    error,
                });
            }

            state.last_error = Some(error.to_string());
            tracing::warn!(
                operation,
                attempt = state.attempt,
                max_attempts,
                delay_secs = state.next_delay.as_secs_f64(),
                %kind,
                error = %error,
                "attempt failed, backing off"
            );
            tokio::time::sleep(state.next_delay).await;
            state.advance_delay();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fail {
        Lock,
        Network,
        Fatal,
        Weird,
    }

    impl fmt::Display for Fail {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn classify(fail: &Fail) -> Option<FailureKind> {
        match fail {
            Fail::Lock => Some(FailureKind::TransientLock),
            Fail::Network => Some(FailureKind::TransientOther),
            Fail::Fatal => Some(FailureKind::Terminal),
            Fail::Weird => None,
        }
    }

    fn executor(retry_other: bool) -> RetryingExecutor {
        RetryingExecutor::new(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            retry_transient_other: retry_other,
        })
    }

    /// Fails with `fail` for the first `failures` calls, then succeeds.
    async fn run(
        exec: &RetryingExecutor,
        failures: u32,
        fail: Fail,
    ) -> (Result<Attempted<&'static str>, RetryFailure<Fail>>, u32) {
        let calls = Cell::new(0u32);
        let result = exec
            .execute(
                "test op",
                || {
                    calls.set(calls.get() + 1);
                    let n = calls.get();
                    async move { if n <= failures { Err(fail) } else { Ok("done") } }
                },
                classify,
            )
            .await;
        (result, calls.get())
    }

    #[tokio::test(start_paused = true)]
    async fn lock_failures_below_budget_eventually_succeed() {
        let exec = executor(false);
        for k in 0..3 {
            let (result, calls) = run(&exec, k, Fail::Lock).await;
            let attempted = result.unwrap();
            assert_eq!(attempted.attempts, k + 1);
            assert_eq!(calls, k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lock_failures_at_budget_fail_after_max_attempts() {
        let exec = executor(false);
        for k in [3, 4, 10] {
            let (result, calls) = run(&exec, k, Fail::Lock).await;
            let failure = result.unwrap_err();
            assert_eq!(failure.attempts, 3);
            assert_eq!(failure.kind, FailureKind::TransientLock);
            assert_eq!(failure.error, Fail::Lock);
            assert_eq!(calls, 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_stays_within_bound() {
        let exec = executor(false);
        let start = Instant::now();
        let (result, _) = run(&exec, 5, Fail::Lock).await;
        assert!(result.is_err());
        let elapsed = start.elapsed();
        // 5s + 10s between three attempts
        assert_eq!(elapsed, Duration::from_secs(15));
        assert!(elapsed <= exec.config().max_total_delay());
        assert_eq!(exec.config().max_total_delay(), Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_other_surfaces_immediately_without_opt_in() {
        let (result, calls) = run(&executor(false), 1, Fail::Network).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.kind, FailureKind::TransientOther);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_other_retries_with_opt_in() {
        let (result, calls) = run(&executor(true), 2, Fail::Network).await;
        assert_eq!(result.unwrap().attempts, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_and_unclassified_fail_on_first_attempt() {
        for fail in [Fail::Fatal, Fail::Weird] {
            let (result, calls) = run(&executor(true), 1, fail).await;
            let failure = result.unwrap_err();
            assert_eq!(failure.kind, FailureKind::Terminal);
            assert_eq!(failure.error, fail);
            assert_eq!(calls, 1);
        }
    }

    #[test]
    fn failure_converts_into_taxonomy() {
        let failure = RetryFailure {
            operation: "git push".to_string(),
            kind: FailureKind::TransientLock,
            attempts: 3,
            error: anyhow::anyhow!("index.lock"),
        };
        let err: Error = failure.into();
        assert!(err.is_lock());
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
