//! Bounded retry with exponential backoff.
//!
//! Failures are classified per attempt. Lock contention is always retried,
//! other transient failures only when the caller opts in, and anything the
//! classifier cannot place is treated as terminal.

pub mod classifier;
pub mod executor;

pub use classifier::{classify_http_status, classify_message};
pub use executor::{Attempted, RetryConfig, RetryFailure, RetryState, RetryingExecutor};
