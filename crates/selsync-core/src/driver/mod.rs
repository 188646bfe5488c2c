//! Applying one parameter change end to end.
//!
//! A change edits the replica value, bumps the chart version, publishes the
//! rebuilt artifact, points the controller at it and commits the result with
//! a discoverable marker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use crate::config::ResourceConfig;
use crate::error::{Error, Result};
use crate::manifest::ParameterStore;
use crate::package::Packager;
use crate::records::{RecordStore, marker};
use crate::registry::{ArtifactRegistry, RegistryError};
use crate::retry::{RetryingExecutor, classify_message};
use crate::types::{BumpKind, ChangeRecord};
use crate::version;

const CHART_VERSION_KEY: &str = "version";

/// What `apply` would do, computed without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangePlan {
    pub resource_id: String,
    pub namespace: String,
    pub artifact_id: String,
    pub previous_value: u32,
    pub new_value: u32,
    pub current_version: String,
    pub next_version: String,
    pub previous_pointer: String,
    pub head: String,
    pub actions: Vec<String>,
}

impl ChangePlan {
    /// The record `apply` would persist if the registry accepts `next_version`.
    pub fn preview_record(&self) -> ChangeRecord {
        ChangeRecord {
            resource_id: self.resource_id.clone(),
            namespace: self.namespace.clone(),
            previous_value: self.previous_value,
            new_value: self.new_value,
            published_artifact_id: self.artifact_id.clone(),
            published_artifact_version: self.next_version.clone(),
            previous_artifact_version: self.previous_pointer.clone(),
            created_at_revision: self.head.clone(),
            created_at: Utc::now(),
            change_commit: None,
        }
    }
}

impl fmt::Display for ChangePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, action)?;
        }
        Ok(())
    }
}

/// Contents of a file before it was edited.
#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    content: Vec<u8>,
}

impl Snapshot {
    fn take(path: PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self { path, content })
    }

    fn restore(&self) -> anyhow::Result<()> {
        std::fs::write(&self.path, &self.content)
            .with_context(|| format!("Failed to restore {}", self.path.display()))
    }
}

fn restore_all(snapshots: &[Snapshot]) {
    for snapshot in snapshots {
        if let Err(err) = snapshot.restore() {
            tracing::warn!(error = %err, "could not restore file after failed change");
        }
    }
}

pub struct ChangeDriver {
    records: Arc<dyn RecordStore>,
    params: Arc<dyn ParameterStore>,
    packager: Arc<dyn Packager>,
    registry: Arc<dyn ArtifactRegistry>,
    executor: RetryingExecutor,
    resources: Vec<ResourceConfig>,
    package_dir: PathBuf,
}

impl fmt::Debug for ChangeDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDriver")
            .field("resources", &self.resources.len())
            .field("package_dir", &self.package_dir)
            .finish_non_exhaustive()
    }
}

impl ChangeDriver {
    pub fn new(
        records: Arc<dyn RecordStore>,
        params: Arc<dyn ParameterStore>,
        packager: Arc<dyn Packager>,
        registry: Arc<dyn ArtifactRegistry>,
        executor: RetryingExecutor,
    ) -> Self {
        Self {
            records,
            params,
            packager,
            registry,
            executor,
            resources: Vec::new(),
            package_dir: PathBuf::from(".selsync/packages"),
        }
    }

    pub fn with_resources(mut self, resources: Vec<ResourceConfig>) -> Self {
        self.resources = resources;
        self
    }

    /// Directory (relative to the working tree) packages are written to.
    pub fn with_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_dir = dir.into();
        self
    }

    pub fn package_dir(&self) -> PathBuf {
        self.records.workdir().join(&self.package_dir)
    }

    fn resource(&self, resource_id: &str) -> Result<&ResourceConfig> {
        self.resources
            .iter()
            .find(|r| r.id == resource_id)
            .ok_or_else(|| Error::terminal(format!("Unknown resource: {}", resource_id)))
    }

    fn read_replicas(&self, resource: &ResourceConfig) -> anyhow::Result<u32> {
        let raw = self
            .params
            .read_field(&resource.values_path(), &resource.replica_key)?;
        raw.trim().parse::<u32>().with_context(|| {
            format!(
                "'{}' in {} is not a replica count: {}",
                resource.replica_key,
                resource.values_path().display(),
                raw
            )
        })
    }

    /// Compute the intended change without touching anything.
    pub fn plan(&self, resource_id: &str, new_value: u32, bump: BumpKind) -> Result<ChangePlan> {
        let resource = self.resource(resource_id)?;
        let previous_value = self.read_replicas(resource)?;
        let current_version = self
            .params
            .read_field(&resource.chart_path(), CHART_VERSION_KEY)?;
        let next_version = version::bump(&current_version, bump)?.to_string();
        let previous_pointer = self
            .params
            .read_field(resource.pointer_path(), &resource.pointer_key)?;
        let artifact_id = self
            .params
            .read_field(&resource.chart_path(), "name")
            .unwrap_or_else(|_| resource.id.clone());
        let head = self.records.head()?;

        let actions = vec![
            format!(
                "set {} in {} from {} to {}",
                resource.replica_key,
                resource.values_path().display(),
                previous_value,
                new_value
            ),
            format!(
                "bump chart {} version {} -> {} ({})",
                artifact_id, current_version, next_version, bump
            ),
            format!(
                "package {} into {} and publish {}-{}",
                resource.chart_dir.display(),
                self.package_dir.display(),
                artifact_id,
                next_version
            ),
            format!(
                "set {} in {} from {} to {}",
                resource.pointer_key,
                resource.pointer_path().display(),
                previous_pointer,
                next_version
            ),
            "commit with change marker and push".to_string(),
        ];

        Ok(ChangePlan {
            resource_id: resource.id.clone(),
            namespace: resource.namespace.clone(),
            artifact_id,
            previous_value,
            new_value,
            current_version,
            next_version,
            previous_pointer,
            head,
            actions,
        })
    }

    /// Apply the change and persist it as a marker commit.
    ///
    /// Files edited before the commit are restored if packaging, publishing,
    /// the pointer update or the commit fails. A push failure leaves the
    /// commit in place.
    pub async fn apply(
        &self,
        resource_id: &str,
        new_value: u32,
        bump: BumpKind,
    ) -> Result<ChangeRecord> {
        let resource = self.resource(resource_id)?;
        let workdir = self.records.workdir().to_path_buf();
        let created_at_revision = self.records.head()?;

        let values_path = resource.values_path();
        let chart_path = resource.chart_path();
        let pointer_path = resource.pointer_path().to_path_buf();

        let previous_value = self.read_replicas(resource)?;
        let current_version = self.params.read_field(&chart_path, CHART_VERSION_KEY)?;
        let previous_artifact_version =
            self.params.read_field(&pointer_path, &resource.pointer_key)?;
        let requested = version::bump(&current_version, bump)?.to_string();

        let mut snapshots = Vec::new();
        for path in [&values_path, &chart_path, &pointer_path] {
            snapshots.push(Snapshot::take(workdir.join(path))?);
        }

        let published = match self
            .edit_and_publish(resource, new_value, &requested, &workdir)
            .await
        {
            Ok(published) => published,
            Err(err) => {
                restore_all(&snapshots);
                tracing::warn!(
                    resource = resource_id,
                    version = %requested,
                    "change abandoned, restored edited files"
                );
                return Err(err);
            }
        };

        let mut record = ChangeRecord {
            resource_id: resource.id.clone(),
            namespace: resource.namespace.clone(),
            previous_value,
            new_value,
            published_artifact_id: published.artifact_id,
            published_artifact_version: published.version,
            previous_artifact_version,
            created_at_revision,
            created_at: Utc::now(),
            change_commit: None,
        };

        let message = marker::change_message(&record)?;
        let paths = [values_path, chart_path, pointer_path];
        let (paths, message) = (&paths, message.as_str());
        let records = &self.records;
        let commit = self
            .executor
            .execute(
                "git commit",
                || async move { records.commit(paths, message) },
                classify_git,
            )
            .await;
        let commit = match commit {
            Ok(done) => done.value,
            Err(failure) => {
                restore_all(&snapshots);
                tracing::warn!(
                    resource = resource_id,
                    version = %record.published_artifact_version,
                    "commit failed after publishing, restored edited files; the artifact is orphaned"
                );
                return Err(failure.into());
            }
        };
        record.change_commit = Some(commit.clone());

        let pushed = self
            .executor
            .execute("git push", || async move { records.push().await }, classify_git)
            .await;
        if let Err(failure) = pushed {
            tracing::warn!(
                resource = resource_id,
                commit = %commit,
                "push failed; the change commit stays local until pushed or cleaned up"
            );
            return Err(failure.into());
        }

        tracing::info!(
            resource = resource_id,
            replicas = new_value,
            version = %record.published_artifact_version,
            commit = %commit,
            "change applied"
        );
        Ok(record)
    }

    async fn edit_and_publish(
        &self,
        resource: &ResourceConfig,
        new_value: u32,
        requested: &str,
        workdir: &Path,
    ) -> Result<Published> {
        self.params.write_field(
            &resource.values_path(),
            &resource.replica_key,
            &new_value.to_string(),
        )?;
        self.params
            .write_field(&resource.chart_path(), CHART_VERSION_KEY, requested)?;

        let packaged = self
            .packager
            .package(&workdir.join(&resource.chart_dir), &self.package_dir())
            .await
            .with_context(|| format!("Failed to package version {}", requested))?;
        if packaged.version != requested {
            tracing::warn!(
                requested,
                packaged = %packaged.version,
                "packager produced a different version than requested"
            );
        }
        let bytes = std::fs::read(&packaged.path)
            .with_context(|| format!("Failed to read {}", packaged.path.display()))?;
        let file_name = packaged.file_name();

        let registry = &self.registry;
        let (name, version, file) = (
            packaged.name.as_str(),
            packaged.version.as_str(),
            file_name.as_str(),
        );
        let accepted = self
            .executor
            .execute(
                "publish artifact",
                || {
                    let bytes = bytes.clone();
                    async move { registry.publish(name, version, file, bytes).await }
                },
                RegistryError::classify,
            )
            .await
            .map_err(|failure| {
                tracing::warn!(version, "publish failed");
                Error::from(failure.into_anyhow())
            })?
            .value;

        self.params.write_field(
            resource.pointer_path(),
            &resource.pointer_key,
            &accepted.version,
        )?;
        Ok(Published {
            artifact_id: accepted.artifact_id,
            version: accepted.version,
        })
    }
}

struct Published {
    artifact_id: String,
    version: String,
}

fn classify_git(err: &anyhow::Error) -> Option<crate::error::FailureKind> {
    classify_message(&format!("{:#}", err))
}
