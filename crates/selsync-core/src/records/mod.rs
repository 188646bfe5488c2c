//! Durable change records kept in the source-of-truth repository.
//!
//! A change is a commit whose message carries a JSON marker, so any later
//! invocation can rediscover what was applied and undo exactly that.

mod git;
pub mod marker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use git::GitRecordStore;

use crate::types::ChangeRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Root of the working tree manifests are edited in.
    fn workdir(&self) -> &Path;

    /// Current HEAD commit id.
    fn head(&self) -> anyhow::Result<String>;

    /// Stage `paths` (relative to the workdir) and commit them.
    fn commit(&self, paths: &[PathBuf], message: &str) -> anyhow::Result<String>;

    /// Publish local commits to the remote the controller watches.
    async fn push(&self) -> anyhow::Result<()>;

    /// Commit the inverse of `commit_id`.
    fn revert(&self, commit_id: &str, message: &str) -> anyhow::Result<String>;

    /// Newest change committed for `resource_id`, with its commit id set.
    fn find_latest_change(&self, resource_id: &str) -> anyhow::Result<Option<ChangeRecord>>;

    /// Whether a revert of `commit_id` exists in history.
    fn is_reverted(&self, commit_id: &str) -> anyhow::Result<bool>;
}
