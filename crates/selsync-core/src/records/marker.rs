//! Commit message markers for change and revert commits.

use crate::types::ChangeRecord;

pub const CHANGE_TRAILER: &str = "Selsync-Change:";
pub const REVERT_TRAILER: &str = "Selsync-Revert:";

/// Commit message for a change commit.
pub fn change_message(record: &ChangeRecord) -> anyhow::Result<String> {
    let json = serde_json::to_string(record)?;
    Ok(format!(
        "selsync: set {} replicas {} -> {} (chart {})\n\n{} {}\n",
        record.resource_id,
        record.previous_value,
        record.new_value,
        record.published_artifact_version,
        CHANGE_TRAILER,
        json
    ))
}

/// Commit message for the revert of `change_commit`.
pub fn revert_message(record: &ChangeRecord, change_commit: &str) -> String {
    format!(
        "selsync: revert {} replicas {} -> {} (chart {})\n\n{} {}\n",
        record.resource_id,
        record.new_value,
        record.previous_value,
        record.previous_artifact_version,
        REVERT_TRAILER,
        change_commit
    )
}

pub fn parse_change(message: &str) -> Option<ChangeRecord> {
    let payload = trailer(message, CHANGE_TRAILER)?;
    match serde_json::from_str(payload) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed change marker");
            None
        }
    }
}

pub fn parse_revert(message: &str) -> Option<&str> {
    trailer(message, REVERT_TRAILER).filter(|id| !id.is_empty())
}

fn trailer<'a>(message: &'a str, key: &str) -> Option<&'a str> {
    message
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(key))
        .map(str::trim)
}
