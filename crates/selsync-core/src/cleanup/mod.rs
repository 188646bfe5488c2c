//! Compensating rollback of an applied change.
//!
//! Order: revert and push, wait for re-convergence, remove the published
//! artifact, remove the local package. Only the revert is fatal; every later
//! step records its outcome and carries on.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::detector::{PhaseDetector, WatchOutcome};
use crate::error::{Error, FailureKind, Result};
use crate::package::remove_local_package;
use crate::records::{RecordStore, marker};
use crate::registry::{ArtifactRegistry, RegistryError};
use crate::retry::{RetryingExecutor, classify_message};
use crate::types::ChangeRecord;

/// Result of one cleanup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
    Success,
    /// Nothing to do; an earlier run already handled it.
    AlreadyClean,
    /// Failed without affecting the rollback result.
    SkippedWarning,
    Failed,
    NotRun,
}

impl StepOutcome {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Success | Self::AlreadyClean)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::AlreadyClean => "already-clean",
            Self::SkippedWarning => "skipped-warning",
            Self::Failed => "failed",
            Self::NotRun => "not-run",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub resource_id: String,
    pub artifact: String,
    pub local_revert: StepOutcome,
    pub reconvergence: StepOutcome,
    pub remote_cleanup: StepOutcome,
    pub local_packages: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchOutcome>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub remediation: Option<&'static str>,
}

impl CleanupReport {
    fn new(record: &ChangeRecord) -> Self {
        Self {
            resource_id: record.resource_id.clone(),
            artifact: format!(
                "{}-{}",
                record.published_artifact_id, record.published_artifact_version
            ),
            local_revert: StepOutcome::NotRun,
            reconvergence: StepOutcome::NotRun,
            remote_cleanup: StepOutcome::NotRun,
            local_packages: StepOutcome::NotRun,
            revert_commit: None,
            watch: None,
            warnings: Vec::new(),
            error: None,
            remediation: None,
        }
    }

    /// The source repository is back at the prior state.
    pub fn succeeded(&self) -> bool {
        self.local_revert.is_ok()
    }

    /// Every step completed without warnings.
    pub fn fully_clean(&self) -> bool {
        self.local_revert.is_ok()
            && self.reconvergence.is_ok()
            && self.remote_cleanup.is_ok()
            && self.local_packages.is_ok()
    }
}

/// Steps `rollback` would run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupPlan {
    pub resource_id: String,
    pub actions: Vec<String>,
}

impl fmt::Display for CleanupPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, action)?;
        }
        Ok(())
    }
}

pub struct CompensatingCleanup {
    records: Arc<dyn RecordStore>,
    registry: Arc<dyn ArtifactRegistry>,
    detector: PhaseDetector,
    executor: RetryingExecutor,
    package_dir: PathBuf,
}

impl fmt::Debug for CompensatingCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompensatingCleanup")
            .field("package_dir", &self.package_dir)
            .finish_non_exhaustive()
    }
}

impl CompensatingCleanup {
    pub fn new(
        records: Arc<dyn RecordStore>,
        registry: Arc<dyn ArtifactRegistry>,
        detector: PhaseDetector,
        executor: RetryingExecutor,
    ) -> Self {
        Self {
            records,
            registry,
            detector,
            executor,
            package_dir: PathBuf::from(".selsync/packages"),
        }
    }

    /// Directory (relative to the working tree) packages were written to.
    pub fn with_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_dir = dir.into();
        self
    }

    /// Newest change recorded for `resource_id`, unless it was already reverted.
    pub fn discover(&self, resource_id: &str) -> Result<Option<ChangeRecord>> {
        let Some(record) = self.records.find_latest_change(resource_id)? else {
            return Ok(None);
        };
        let reverted = match &record.change_commit {
            Some(commit) => self.records.is_reverted(commit)?,
            None => false,
        };
        Ok((!reverted).then_some(record))
    }

    pub fn plan(&self, record: &ChangeRecord) -> CleanupPlan {
        let commit = record.change_commit.as_deref().unwrap_or("<change commit>");
        CleanupPlan {
            resource_id: record.resource_id.clone(),
            actions: vec![
                format!("revert {} and push", commit),
                format!(
                    "wait for {} to return to {} replicas at {}",
                    record.resource_id, record.previous_value, record.previous_artifact_version
                ),
                format!(
                    "delete {} {} from the registry if present",
                    record.published_artifact_id, record.published_artifact_version
                ),
                format!(
                    "remove {} from {}",
                    record.package_file_name(),
                    self.package_dir.display()
                ),
            ],
        }
    }

    /// Undo `record`. Safe to call again after a full or partial run.
    pub async fn rollback(&self, record: &ChangeRecord) -> CleanupReport {
        let mut report = CleanupReport::new(record);

        match self.revert(record).await {
            Ok(revert) => {
                report.local_revert = revert.outcome;
                report.revert_commit = revert.commit;
            }
            Err(err) => {
                tracing::warn!(resource = %record.resource_id, error = %err, "revert failed");
                report.local_revert = StepOutcome::Failed;
                report.remediation = err.remediation();
                report.error = Some(format!("{:#}", anyhow::Error::new(err)));
                return report;
            }
        }

        let outcome = self.detector.watch(&record.reverse_target()).await;
        if outcome.fully_converged {
            report.reconvergence = StepOutcome::Success;
        } else {
            report.reconvergence = StepOutcome::SkippedWarning;
            let phase = outcome
                .failed_phase()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "watch".to_string());
            report.warnings.push(format!(
                "{} did not re-converge ({} phase, last status: {})",
                record.resource_id,
                phase,
                outcome.last_status()
            ));
        }
        report.watch = Some(outcome);

        let (remote, local) = tokio::join!(self.remove_remote(record), async {
            self.remove_local(record)
        });
        report.remote_cleanup = remote.0;
        report.warnings.extend(remote.1);
        report.local_packages = local.0;
        report.warnings.extend(local.1);

        tracing::info!(
            resource = %record.resource_id,
            local_revert = %report.local_revert,
            reconvergence = %report.reconvergence,
            remote_cleanup = %report.remote_cleanup,
            local_packages = %report.local_packages,
            "rollback finished"
        );
        report
    }

    async fn revert(&self, record: &ChangeRecord) -> Result<Reverted> {
        let commit_id = match &record.change_commit {
            Some(id) => id.clone(),
            None => self.locate_commit(record)?,
        };

        let records = &self.records;
        let (outcome, commit) = if self.records.is_reverted(&commit_id)? {
            tracing::info!(commit = %commit_id, "change already reverted");
            (StepOutcome::AlreadyClean, None)
        } else {
            let message = marker::revert_message(record, &commit_id);
            let (id, message) = (commit_id.as_str(), message.as_str());
            let reverted = self
                .executor
                .execute(
                    "git revert",
                    || async move { records.revert(id, message) },
                    classify_git,
                )
                .await?;
            (StepOutcome::Success, Some(reverted.value))
        };

        // Pushing an already-pushed revert is a no-op.
        self.executor
            .execute("git push", || async move { records.push().await }, classify_git)
            .await?;
        Ok(Reverted { outcome, commit })
    }

    fn locate_commit(&self, record: &ChangeRecord) -> Result<String> {
        let found = self.records.find_latest_change(&record.resource_id)?;
        found
            .filter(|r| r.published_artifact_version == record.published_artifact_version)
            .and_then(|r| r.change_commit)
            .ok_or_else(|| {
                Error::terminal(format!(
                    "No change commit found for {} {}",
                    record.resource_id, record.published_artifact_version
                ))
            })
    }

    async fn remove_remote(&self, record: &ChangeRecord) -> (StepOutcome, Vec<String>) {
        let registry = &self.registry;
        let (name, version) = (
            record.published_artifact_id.as_str(),
            record.published_artifact_version.as_str(),
        );

        let found = self
            .executor
            .execute(
                "registry search",
                || async move { registry.search(name, version).await },
                RegistryError::classify,
            )
            .await;
        let component = match found {
            Ok(done) => done.value,
            Err(failure) => {
                return (
                    StepOutcome::SkippedWarning,
                    vec![format!("registry cleanup skipped: {}", failure)],
                );
            }
        };
        let Some(component) = component else {
            tracing::info!(artifact = name, version, "artifact already absent");
            return (StepOutcome::AlreadyClean, Vec::new());
        };

        let component = &component;
        match self
            .executor
            .execute(
                "registry delete",
                || async move { registry.delete(component).await },
                RegistryError::classify,
            )
            .await
        {
            Ok(_) => (StepOutcome::Success, Vec::new()),
            Err(failure) => (
                StepOutcome::SkippedWarning,
                vec![format!("registry delete failed: {}", failure)],
            ),
        }
    }

    fn remove_local(&self, record: &ChangeRecord) -> (StepOutcome, Vec<String>) {
        let dir = self.records.workdir().join(&self.package_dir);
        match remove_local_package(&dir, &record.package_file_name()) {
            Ok(true) => (StepOutcome::Success, Vec::new()),
            Ok(false) => (StepOutcome::AlreadyClean, Vec::new()),
            Err(err) => (
                StepOutcome::SkippedWarning,
                vec![format!("local package removal failed: {:#}", err)],
            ),
        }
    }
}

struct Reverted {
    outcome: StepOutcome,
    commit: Option<String>,
}

fn classify_git(err: &anyhow::Error) -> Option<FailureKind> {
    classify_message(&format!("{:#}", err))
}
