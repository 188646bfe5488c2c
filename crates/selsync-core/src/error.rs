//! Error taxonomy shared by every component.

use std::fmt;
use std::time::Duration;

use crate::types::Phase;

/// How a failed attempt should be treated by the retry layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Another process holds the resource. Back off and retry.
    TransientLock,
    /// Network or service hiccup. Retried only when the caller opts in.
    TransientOther,
    /// Never retried.
    Terminal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientLock => f.write_str("transient-lock"),
            Self::TransientOther => f.write_str("transient-other"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{operation}: resource busy after {attempts} attempt(s): {source}")]
    TransientLock {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: network failure after {attempts} attempt(s): {source}")]
    TransientNetwork {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Terminal(#[from] anyhow::Error),

    #[error("{phase} phase timed out after {}s", .elapsed.as_secs())]
    Timeout { phase: Phase, elapsed: Duration },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn terminal(message: impl fmt::Display) -> Self {
        Self::Terminal(anyhow::anyhow!("{}", message))
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::TransientLock { .. } => Some(FailureKind::TransientLock),
            Self::TransientNetwork { .. } => Some(FailureKind::TransientOther),
            Self::Terminal(_) => Some(FailureKind::Terminal),
            Self::Timeout { .. } => None,
        }
    }

    pub fn is_lock(&self) -> bool {
        matches!(self, Self::TransientLock { .. })
    }

    /// Operator hint for failures that have a known remedy.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::TransientLock { .. } => Some(
                "another process holds the repository or registry lock; \
                 identify the conflicting holder (e.g. a running git process or a stale \
                 .git/index.lock), resolve it, then re-run",
            ),
            Self::TransientNetwork { .. } => {
                Some("check connectivity to the remote and re-run once it is reachable")
            }
            Self::Terminal(_) | Self::Timeout { .. } => None,
        }
    }
}
