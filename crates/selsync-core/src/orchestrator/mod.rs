//! End-to-end demonstration run.
//!
//! Snapshot, apply, watch, compare the control resource, then optionally
//! roll back. The orchestrator reports what happened; only a failed change
//! or a phase timeout makes the run unsuccessful.

pub mod render;
mod selective;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

pub use selective::SelectiveSync;

use crate::cleanup::{CleanupPlan, CleanupReport, CompensatingCleanup};
use crate::detector::{PhaseDetector, WatchOutcome};
use crate::driver::{ChangeDriver, ChangePlan};
use crate::error::Error;
use crate::probe::StatusProbe;
use crate::types::{BumpKind, ChangeRecord, Status};

/// Asks the operator a yes/no question.
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupMode {
    /// Roll back without asking
    Auto,
    /// Leave the change in place
    Skip,
    /// Ask through the configured prompter
    #[default]
    Prompt,
}

#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    pub dry_run: bool,
    pub cleanup: CleanupMode,
}

impl DemoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupMode) -> Self {
        self.cleanup = cleanup;
        self
    }
}

/// What to change and what to keep an eye on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoRequest {
    pub resource_id: String,
    pub control_id: Option<String>,
    pub replicas: u32,
    pub bump: BumpKind,
}

impl DemoRequest {
    pub fn new(resource_id: impl Into<String>, replicas: u32) -> Self {
        Self {
            resource_id: resource_id.into(),
            control_id: None,
            replicas,
            bump: BumpKind::Patch,
        }
    }

    pub fn with_control(mut self, control_id: Option<String>) -> Self {
        self.control_id = control_id;
        self
    }

    pub fn with_bump(mut self, bump: BumpKind) -> Self {
        self.bump = bump;
        self
    }
}

/// A failure rendered for operators.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl From<&Error> for FailureSummary {
    fn from(err: &Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = std::error::Error::source(cause);
        }
        Self {
            message,
            kind: err.kind().map(|k| k.to_string()),
            remediation: err.remediation().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRun {
    pub change: ChangePlan,
    pub cleanup: Option<CleanupPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_error: Option<FailureSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchOutcome>,
    pub selective_sync: SelectiveSync,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,
    pub warnings: Vec<String>,
}

impl DemoReport {
    fn new(request: &DemoRequest) -> Self {
        Self {
            resource_id: request.resource_id.clone(),
            control_id: request.control_id.clone(),
            dry_run: None,
            before: None,
            change: None,
            change_error: None,
            watch: None,
            selective_sync: SelectiveSync::NotChecked,
            cleanup: None,
            warnings: Vec::new(),
        }
    }

    pub fn converged(&self) -> bool {
        self.watch.as_ref().is_some_and(|w| w.fully_converged)
    }

    /// Converged with the control resource untouched.
    pub fn selective_sync_demonstrated(&self) -> bool {
        self.converged() && self.selective_sync == SelectiveSync::Held
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.dry_run.is_some() {
            return ExitCode::Success;
        }
        if self.change_error.is_some() {
            return ExitCode::ChangeFailed;
        }
        if !self.converged() {
            return ExitCode::NotConverged;
        }
        if self.cleanup.as_ref().is_some_and(|c| !c.succeeded()) {
            return ExitCode::CleanupFailed;
        }
        ExitCode::Success
    }
}

/// Process exit status of a demo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitCode {
    Success,
    NotConverged,
    ChangeFailed,
    CleanupFailed,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NotConverged => 1,
            Self::ChangeFailed => 2,
            Self::CleanupFailed => 3,
        }
    }
}

pub struct DemoOrchestrator {
    driver: ChangeDriver,
    cleanup: CompensatingCleanup,
    detector: PhaseDetector,
    probe: StatusProbe,
    prompter: Option<Arc<dyn Prompter>>,
}

impl fmt::Debug for DemoOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoOrchestrator")
            .field("driver", &self.driver)
            .field("prompter", &self.prompter.is_some())
            .finish_non_exhaustive()
    }
}

impl DemoOrchestrator {
    pub fn new(
        driver: ChangeDriver,
        cleanup: CompensatingCleanup,
        detector: PhaseDetector,
        probe: StatusProbe,
    ) -> Self {
        Self {
            driver,
            cleanup,
            detector,
            probe,
            prompter: None,
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub async fn run(&self, request: &DemoRequest, options: &DemoOptions) -> DemoReport {
        let mut report = DemoReport::new(request);

        if options.dry_run {
            self.dry_run(request, options, &mut report);
            return report;
        }

        report.before = Some(self.probe.fetch(&request.resource_id).await);
        let control_before = match &request.control_id {
            Some(id) => Some(self.probe.fetch(id).await),
            None => None,
        };

        let record = match self
            .driver
            .apply(&request.resource_id, request.replicas, request.bump)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(resource = %request.resource_id, error = %err, "change failed");
                report.change_error = Some(FailureSummary::from(&err));
                return report;
            }
        };

        let outcome = self.detector.watch(&record.forward_target()).await;
        let cancelled = outcome.cancelled();
        report.watch = Some(outcome);
        report.change = Some(record.clone());

        if let (Some(id), Some(before)) = (&request.control_id, &control_before) {
            let after = self.probe.fetch(id).await;
            report.selective_sync = SelectiveSync::check(before, &after);
            tracing::info!(
                control = %id,
                result = report.selective_sync.label(),
                "selective-sync check"
            );
            if let Some(warning) = report.selective_sync.warning(id) {
                report.warnings.push(warning);
            }
        }

        if cancelled {
            report.warnings.push(format!(
                "interrupted; run `selsync cleanup --resource {}` to roll back",
                record.resource_id
            ));
            return report;
        }

        if self.should_clean_up(&record, options, &mut report) {
            report.cleanup = Some(self.cleanup.rollback(&record).await);
        }
        report
    }

    fn dry_run(&self, request: &DemoRequest, options: &DemoOptions, report: &mut DemoReport) {
        match self
            .driver
            .plan(&request.resource_id, request.replicas, request.bump)
        {
            Ok(change) => {
                let cleanup = (options.cleanup != CleanupMode::Skip)
                    .then(|| self.cleanup.plan(&change.preview_record()));
                report.dry_run = Some(DryRun { change, cleanup });
            }
            Err(err) => report.change_error = Some(FailureSummary::from(&err)),
        }
    }

    fn should_clean_up(
        &self,
        record: &ChangeRecord,
        options: &DemoOptions,
        report: &mut DemoReport,
    ) -> bool {
        match options.cleanup {
            CleanupMode::Auto => true,
            CleanupMode::Skip => false,
            CleanupMode::Prompt => {
                let Some(prompter) = &self.prompter else {
                    report
                        .warnings
                        .push("no prompt available; leaving the change in place".to_string());
                    return false;
                };
                let question = format!(
                    "Roll back {} to {} replicas and delete {} {}?",
                    record.resource_id,
                    record.previous_value,
                    record.published_artifact_id,
                    record.published_artifact_version
                );
                match prompter.confirm(&question) {
                    Ok(answer) => answer,
                    Err(err) => {
                        report
                            .warnings
                            .push(format!("confirmation failed, skipping cleanup: {}", err));
                        false
                    }
                }
            }
        }
    }
}
