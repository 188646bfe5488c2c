//! Shared domain types: status samples, watch targets, change records and
//! phase results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync state reported by the declarative-state controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Synced,
    /// The controller has seen a desired state that differs from the live one.
    OutOfSync,
    #[default]
    Unknown,
}

impl SyncState {
    /// Map a controller label ("Synced", "OutOfSync", ...) to a state.
    ///
    /// Anything unrecognised becomes [`SyncState::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "synced" => Self::Synced,
            "outofsync" | "out-of-sync" | "pending" => Self::OutOfSync,
            _ => Self::Unknown,
        }
    }

    pub fn is_pending(self) -> bool {
        self == Self::OutOfSync
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Synced => "Synced",
            Self::OutOfSync => "OutOfSync",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Health state reported by the declarative-state controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HealthState {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    #[default]
    Unknown,
}

impl HealthState {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "progressing" => Self::Progressing,
            "degraded" => Self::Degraded,
            "suspended" => Self::Suspended,
            "missing" => Self::Missing,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "Healthy",
            Self::Progressing => "Progressing",
            Self::Degraded => "Degraded",
            Self::Suspended => "Suspended",
            Self::Missing => "Missing",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// One status sample of an externally managed resource.
///
/// Every field may be unknown. Unknown never means "error", it means
/// "not converged yet".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Status {
    pub sync_state: SyncState,
    pub health_state: HealthState,
    pub observed_revision: Option<String>,
    pub observed_replica_count: Option<u32>,
}

impl Status {
    /// A sample where nothing could be read.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(
        sync_state: SyncState,
        health_state: HealthState,
        observed_revision: Option<String>,
        observed_replica_count: Option<u32>,
    ) -> Self {
        Self {
            sync_state,
            health_state,
            observed_revision,
            observed_replica_count,
        }
    }

    pub fn revision_matches(&self, target: &str) -> bool {
        self.observed_revision.as_deref() == Some(target)
    }

    pub fn replicas_match(&self, target: u32) -> bool {
        self.observed_replica_count == Some(target)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync={} health={} revision={} replicas={}",
            self.sync_state,
            self.health_state,
            self.observed_revision.as_deref().unwrap_or("unknown"),
            self.observed_replica_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        )
    }
}

/// The resource and target values one monitoring cycle polls for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub resource_id: String,
    pub namespace: String,
    pub target_revision: String,
    pub target_replica_count: u32,
}

impl WatchTarget {
    pub fn new(
        resource_id: impl Into<String>,
        namespace: impl Into<String>,
        target_revision: impl Into<String>,
        target_replica_count: u32,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            namespace: namespace.into(),
            target_revision: target_revision.into(),
            target_replica_count,
        }
    }
}

/// Semantic version component to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BumpKind {
    #[default]
    Patch,
    Minor,
    Major,
}

impl std::str::FromStr for BumpKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patch" => Ok(Self::Patch),
            "minor" => Ok(Self::Minor),
            "major" => Ok(Self::Major),
            other => anyhow::bail!("Unknown bump kind: {} (use patch, minor or major)", other),
        }
    }
}

impl fmt::Display for BumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Patch => "patch",
            Self::Minor => "minor",
            Self::Major => "major",
        };
        f.write_str(label)
    }
}

/// Durable description of one applied change.
///
/// Serialized into the change commit so a later invocation can find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub resource_id: String,
    pub namespace: String,
    pub previous_value: u32,
    pub new_value: u32,
    pub published_artifact_id: String,
    /// Version the registry accepted, not the version requested.
    pub published_artifact_version: String,
    /// Version the pointer referenced before the change.
    pub previous_artifact_version: String,
    /// Source repository HEAD before the change commit.
    pub created_at_revision: String,
    pub created_at: DateTime<Utc>,
    /// Commit carrying this record, known once committed or discovered.
    #[serde(skip)]
    pub change_commit: Option<String>,
}

impl ChangeRecord {
    /// Watch target for the forward change.
    pub fn forward_target(&self) -> WatchTarget {
        WatchTarget::new(
            &self.resource_id,
            &self.namespace,
            &self.published_artifact_version,
            self.new_value,
        )
    }

    /// Watch target for the reversal back to the prior state.
    pub fn reverse_target(&self) -> WatchTarget {
        WatchTarget::new(
            &self.resource_id,
            &self.namespace,
            &self.previous_artifact_version,
            self.previous_value,
        )
    }

    /// File name a packaged artifact of this record has on disk.
    pub fn package_file_name(&self) -> String {
        format!(
            "{}-{}.tgz",
            self.published_artifact_id, self.published_artifact_version
        )
    }
}

/// Polling phase of a monitoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Detection,
    Convergence,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detection => f.write_str("detection"),
            Self::Convergence => f.write_str("convergence"),
        }
    }
}

/// Outcome of one polling phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub elapsed: Duration,
    pub final_status: Status,
    pub timed_out: bool,
    /// The phase ended because the run was cancelled (implies `timed_out`).
    pub cancelled: bool,
}

impl PhaseResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out
    }
}
