//! Git-backed record store.
//!
//! Local history is manipulated through git2; the push goes through the git
//! CLI so the user's credential helpers and transport config apply.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use anyhow::Context;
use async_trait::async_trait;
use git2::{Repository, Signature};
use tokio::process::Command;

use super::RecordStore;
use super::marker;
use crate::config::{PushMode, RepositorySection};
use crate::types::ChangeRecord;

const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

#[derive(Debug, Clone)]
pub struct GitRecordStore {
    workdir: PathBuf,
    remote: String,
    branch: String,
    push: PushMode,
}

impl GitRecordStore {
    /// Open the repository described by `settings`.
    pub fn open(settings: &RepositorySection) -> anyhow::Result<Self> {
        let repo = Repository::discover(&settings.path).with_context(|| {
            format!("Not a git repository: {}", settings.path.display())
        })?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| anyhow::anyhow!("Repository has no working tree (bare?)"))?
            .to_path_buf();
        Ok(Self {
            workdir,
            remote: settings.remote.clone(),
            branch: settings.branch.clone(),
            push: settings.push,
        })
    }

    fn repo(&self) -> anyhow::Result<Repository> {
        Repository::open(&self.workdir)
            .with_context(|| format!("Failed to open repository: {}", self.workdir.display()))
    }

    fn signature(repo: &Repository) -> anyhow::Result<Signature<'static>> {
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("selsync", "selsync@localhost")?),
        }
    }

    /// Run a git command in the working tree.
    async fn run_git(&self, args: &[&str]) -> anyhow::Result<String> {
        let mut cmd = Command::new("git");
        for key in GIT_ENV_OVERRIDES {
            cmd.env_remove(key);
        }
        cmd.args(args).current_dir(&self.workdir);
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run git {:?}", args))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Git command failed {:?}: {}", args, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn commit_index(
        repo: &Repository,
        index: &mut git2::Index,
        message: &str,
    ) -> anyhow::Result<String> {
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Self::signature(repo)?;
        let parent = repo.head()?.peel_to_commit()?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        Ok(oid.to_string())
    }
}

#[async_trait]
impl RecordStore for GitRecordStore {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head(&self) -> anyhow::Result<String> {
        let repo = self.repo()?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn commit(&self, paths: &[PathBuf], message: &str) -> anyhow::Result<String> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        for path in paths {
            index
                .add_path(path)
                .with_context(|| format!("Failed to stage {}", path.display()))?;
        }
        index.write()?;
        let id = Self::commit_index(&repo, &mut index, message)?;
        tracing::debug!(commit = %id, files = paths.len(), "committed change");
        Ok(id)
    }

    async fn push(&self) -> anyhow::Result<()> {
        if self.push == PushMode::Disabled {
            tracing::debug!("push disabled, keeping commits local");
            return Ok(());
        }
        let refspec = format!("HEAD:{}", self.branch);
        self.run_git(&["push", &self.remote, &refspec]).await?;
        tracing::info!(remote = %self.remote, branch = %self.branch, "pushed");
        Ok(())
    }

    fn revert(&self, commit_id: &str, message: &str) -> anyhow::Result<String> {
        let repo = self.repo()?;
        let oid = git2::Oid::from_str(commit_id)
            .with_context(|| format!("Invalid commit id: {}", commit_id))?;
        let commit = repo
            .find_commit(oid)
            .with_context(|| format!("Change commit not found: {}", commit_id))?;

        repo.revert(&commit, None)
            .with_context(|| format!("Failed to revert {}", commit_id))?;
        let mut index = repo.index()?;
        if index.has_conflicts() {
            repo.cleanup_state()?;
            let mut checkout = git2::build::CheckoutBuilder::new();
            checkout.force();
            repo.checkout_head(Some(&mut checkout))?;
            anyhow::bail!(
                "Revert of {} conflicts with later commits; resolve manually",
                commit_id
            );
        }
        let id = Self::commit_index(&repo, &mut index, message)?;
        repo.cleanup_state()?;
        tracing::debug!(commit = %id, reverted = commit_id, "committed revert");
        Ok(id)
    }

    fn find_latest_change(&self, resource_id: &str) -> anyhow::Result<Option<ChangeRecord>> {
        let repo = self.repo()?;
        let mut revwalk = repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;

        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            let Some(message) = commit.message() else {
                continue;
            };
            if let Some(mut record) = marker::parse_change(message)
                && record.resource_id == resource_id
            {
                record.change_commit = Some(commit.id().to_string());
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn is_reverted(&self, commit_id: &str) -> anyhow::Result<bool> {
        let repo = self.repo()?;
        let mut revwalk = repo.revwalk()?;
        revwalk.push_head()?;

        let mut reverted = HashSet::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            if let Some(id) = commit.message().and_then(marker::parse_revert) {
                reverted.insert(id.to_string());
            }
            if commit.id().to_string() == commit_id {
                return Ok(reverted.contains(commit_id));
            }
        }
        Ok(false)
    }
}
