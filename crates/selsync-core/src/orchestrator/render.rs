//! Plain-text rendering of reports.

use std::fmt::Write;

use super::{DemoReport, SelectiveSync};
use crate::cleanup::CleanupReport;
use crate::detector::WatchOutcome;

/// Lines explaining why a run did not succeed. Empty on success.
pub fn failure_lines(report: &DemoReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(err) = &report.change_error {
        lines.push(format!("change failed: {}", err.message));
        if let Some(hint) = &err.remediation {
            lines.push(format!("hint: {}", hint));
        }
        return lines;
    }
    if let Some(watch) = &report.watch {
        lines.extend(watch_failure_lines(watch));
    }
    if let Some(cleanup) = &report.cleanup {
        lines.extend(cleanup_failure_lines(cleanup));
    }
    lines
}

pub fn watch_failure_lines(watch: &WatchOutcome) -> Vec<String> {
    let Some(phase) = watch.failed_phase() else {
        return Vec::new();
    };
    let headline = match watch.timeout_error() {
        Some(err) => err.to_string(),
        None => format!(
            "{} phase interrupted after {}s",
            phase,
            watch.total_elapsed().as_secs()
        ),
    };
    vec![headline, format!("last status: {}", watch.last_status())]
}

pub fn cleanup_failure_lines(cleanup: &CleanupReport) -> Vec<String> {
    if cleanup.succeeded() {
        return Vec::new();
    }
    let mut lines = vec![format!(
        "rollback failed: {}",
        cleanup.error.as_deref().unwrap_or("local revert did not complete")
    )];
    if let Some(hint) = cleanup.remediation {
        lines.push(format!("hint: {}", hint));
    }
    lines
}

/// Step table of a cleanup report.
pub fn cleanup_table(cleanup: &CleanupReport) -> String {
    let mut out = String::new();
    let rows = [
        ("local revert", cleanup.local_revert),
        ("re-convergence", cleanup.reconvergence),
        ("remote cleanup", cleanup.remote_cleanup),
        ("local packages", cleanup.local_packages),
    ];
    for (step, outcome) in rows {
        let _ = writeln!(out, "  {:<16} {}", step, outcome);
    }
    for warning in &cleanup.warnings {
        let _ = writeln!(out, "  ⚠ {}", warning);
    }
    out
}

/// Full human-readable report.
pub fn render_text(report: &DemoReport) -> String {
    let mut out = String::new();

    if let Some(plan) = &report.dry_run {
        let _ = writeln!(out, "Dry run for {}:", report.resource_id);
        let _ = write!(out, "{}", plan.change);
        if let Some(cleanup) = &plan.cleanup {
            let _ = writeln!(out, "Cleanup:");
            let _ = write!(out, "{}", cleanup);
        }
        return out;
    }

    if let Some(before) = &report.before {
        let _ = writeln!(out, "Before:   {}", before);
    }
    if let Some(change) = &report.change {
        let _ = writeln!(
            out,
            "Change:   {} replicas {} -> {}, {} {} -> {}{}",
            change.resource_id,
            change.previous_value,
            change.new_value,
            change.published_artifact_id,
            change.previous_artifact_version,
            change.published_artifact_version,
            change
                .change_commit
                .as_deref()
                .map(|c| format!(" ({})", c.get(..8).unwrap_or(c)))
                .unwrap_or_default()
        );
    }
    if let Some(watch) = &report.watch {
        let _ = writeln!(
            out,
            "Watch:    {:?} in {}s, last {}",
            watch.state(),
            watch.total_elapsed().as_secs(),
            watch.last_status()
        );
    }
    if let Some(control) = &report.control_id {
        let _ = writeln!(
            out,
            "Control:  {} selective-sync {}",
            control,
            report.selective_sync.label()
        );
    }
    if let Some(cleanup) = &report.cleanup {
        let _ = writeln!(out, "Cleanup:");
        out.push_str(&cleanup_table(cleanup));
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "⚠ {}", warning);
    }
    for line in failure_lines(report) {
        let _ = writeln!(out, "{}", line);
    }
    if report.selective_sync_demonstrated() {
        let _ = writeln!(out, "Selective sync demonstrated.");
    } else if report.converged() && report.selective_sync == SelectiveSync::NotChecked {
        let _ = writeln!(out, "Converged (no control resource checked).");
    }
    out
}
