#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use git2::{IndexAddOption, Repository};
use tempfile::TempDir;

use selsync_core::config::{PushMode, RepositorySection, ResourceConfig};
use selsync_core::detector::{DetectorConfig, PhaseDetector};
use selsync_core::manifest::{ParameterStore, YamlParameterStore};
use selsync_core::package::{PackagedArtifact, Packager, read_chart_meta};
use selsync_core::probe::{StatusAccessor, StatusProbe};
use selsync_core::records::{GitRecordStore, RecordStore};
use selsync_core::registry::{ArtifactRegistry, ComponentId, PublishedArtifact, RegistryError};
use selsync_core::retry::{RetryConfig, RetryingExecutor};
use selsync_core::ticker::Ticker;
use selsync_core::types::{HealthState, Status, SyncState};

const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

pub fn git_command() -> Command {
    let mut cmd = Command::new("git");
    for key in GIT_ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd
}

pub const POINTER_KEY: &str = "spec.source.targetRevision";

fn application(name: &str, version: &str) -> String {
    format!(
        "apiVersion: argoproj.io/v1alpha1\nkind: Application\nmetadata:\n  name: {name}\nspec:\n  source:\n    chart: {name}\n    targetRevision: {version}\n"
    )
}

/// A source repository with two charts and a bare remote to push to.
pub struct Fixture {
    pub temp: TempDir,
    pub workdir: PathBuf,
    pub remote: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let workdir = temp.path().join("work");
        let remote = temp.path().join("remote.git");
        Repository::init_bare(&remote).unwrap();
        let repo = Repository::init(&workdir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Fixture").unwrap();
            config.set_str("user.email", "fixture@example.com").unwrap();
        }
        repo.remote("origin", remote.to_str().unwrap()).unwrap();

        for (name, version) in [("svcA", "0.1.0"), ("svcB", "0.2.0")] {
            let chart = workdir.join("charts").join(name);
            std::fs::create_dir_all(&chart).unwrap();
            std::fs::write(
                chart.join("Chart.yaml"),
                format!("apiVersion: v2\nname: {name}\nversion: {version}\n"),
            )
            .unwrap();
            std::fs::write(chart.join("values.yaml"), "replicaCount: 1\n").unwrap();
            std::fs::create_dir_all(workdir.join("apps")).unwrap();
            std::fs::write(
                workdir.join("apps").join(format!("{name}.yaml")),
                application(name, version),
            )
            .unwrap();
        }
        std::fs::write(workdir.join(".gitignore"), ".selsync/\n").unwrap();
        commit_all(&repo, "initial layout");

        Self {
            temp,
            workdir,
            remote,
        }
    }

    pub fn settings(&self) -> RepositorySection {
        RepositorySection {
            path: self.workdir.clone(),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            push: PushMode::Enabled,
        }
    }

    pub fn resources(&self) -> Vec<ResourceConfig> {
        ["svcA", "svcB"]
            .into_iter()
            .map(|name| {
                ResourceConfig::new(
                    name,
                    format!("charts/{name}"),
                    format!("apps/{name}.yaml"),
                )
            })
            .collect()
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::new(GitRecordStore::open(&self.settings()).unwrap())
    }

    pub fn params(&self) -> YamlParameterStore {
        YamlParameterStore::new(self.workdir.clone())
    }

    pub fn read(&self, file: &str, key: &str) -> String {
        self.params().read_field(Path::new(file), key).unwrap()
    }

    pub fn repo(&self) -> Repository {
        Repository::open(&self.workdir).unwrap()
    }

    pub fn head_message(&self) -> String {
        let repo = self.repo();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        commit.message().unwrap().to_string()
    }

    /// Commit id of `main` on the bare remote, if it was ever pushed.
    pub fn remote_main(&self) -> Option<String> {
        let remote = Repository::open_bare(&self.remote).unwrap();
        remote
            .find_reference("refs/heads/main")
            .ok()
            .and_then(|r| r.target())
            .map(|oid| oid.to_string())
    }

    pub fn package_dir(&self) -> PathBuf {
        self.workdir.join(".selsync/packages")
    }
}

pub fn commit_all(repo: &Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = repo.signature().unwrap();
    match repo.head() {
        Ok(head) => {
            let parent = repo.find_commit(head.target().unwrap()).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
                .unwrap()
        }
        Err(_) => repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
            .unwrap(),
    }
}

/// Detector timings small enough for paused-clock tests.
pub fn fast_detector() -> DetectorConfig {
    DetectorConfig {
        detection_interval: Duration::from_secs(1),
        detection_timeout: Duration::from_secs(30),
        convergence_interval: Duration::from_secs(2),
        convergence_timeout: Duration::from_secs(120),
        settle_window: Duration::from_secs(6),
    }
}

pub fn detector(accessor: Arc<dyn StatusAccessor>, config: DetectorConfig) -> PhaseDetector {
    PhaseDetector::new(StatusProbe::new(accessor), config, Ticker::default())
}

pub fn executor() -> RetryingExecutor {
    RetryingExecutor::new(RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(5),
        retry_transient_other: true,
    })
}

#[derive(Debug, Clone)]
struct Observed {
    revision: String,
    replicas: u32,
    /// Samples left before the controller applies a pending change
    lag: Option<u32>,
    /// Samples left in which the workload reports Progressing
    starting: u32,
}

/// Simulated controller that follows the manifests in a working tree.
///
/// A change of the pointer or replica value shows up as OutOfSync for
/// `lag` samples, then Synced/Progressing for `startup` samples, then
/// Synced/Healthy.
pub struct FakeCluster {
    params: YamlParameterStore,
    resources: HashMap<String, ResourceConfig>,
    lag: u32,
    startup: u32,
    state: Mutex<HashMap<String, Observed>>,
}

impl FakeCluster {
    pub fn new(fixture: &Fixture, lag: u32, startup: u32) -> Self {
        let params = fixture.params();
        let resources: HashMap<_, _> = fixture
            .resources()
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let mut state = HashMap::new();
        for (id, resource) in &resources {
            let (revision, replicas) = desired(&params, resource).unwrap();
            state.insert(
                id.clone(),
                Observed {
                    revision,
                    replicas,
                    lag: None,
                    starting: 0,
                },
            );
        }
        Self {
            params,
            resources,
            lag,
            startup,
            state: Mutex::new(state),
        }
    }
}

fn desired(params: &YamlParameterStore, resource: &ResourceConfig) -> anyhow::Result<(String, u32)> {
    let revision = params.read_field(resource.pointer_path(), &resource.pointer_key)?;
    let replicas = params
        .read_field(&resource.values_path(), &resource.replica_key)?
        .parse()?;
    Ok((revision, replicas))
}

#[async_trait]
impl StatusAccessor for FakeCluster {
    async fn get_status(&self, resource_id: &str) -> anyhow::Result<Status> {
        let resource = self
            .resources
            .get(resource_id)
            .ok_or_else(|| anyhow::anyhow!("no such application: {}", resource_id))?;
        let (revision, replicas) = desired(&self.params, resource)?;

        let mut state = self.state.lock().unwrap();
        let observed = state.get_mut(resource_id).unwrap();
        let status = |sync, health, o: &Observed| {
            Status::new(sync, health, Some(o.revision.clone()), Some(o.replicas))
        };

        if observed.revision != revision || observed.replicas != replicas {
            let left = observed.lag.get_or_insert(self.lag);
            if *left > 0 {
                *left -= 1;
                return Ok(status(SyncState::OutOfSync, HealthState::Healthy, &*observed));
            }
            observed.revision = revision;
            observed.replicas = replicas;
            observed.lag = None;
            observed.starting = self.startup;
        }
        if observed.starting > 0 {
            observed.starting -= 1;
            return Ok(status(SyncState::Synced, HealthState::Progressing, &*observed));
        }
        Ok(status(SyncState::Synced, HealthState::Healthy, &*observed))
    }
}

/// Replays a fixed list of samples, repeating the last one.
pub struct ScriptedAccessor {
    samples: Vec<Status>,
    calls: AtomicU32,
}

impl ScriptedAccessor {
    pub fn new(samples: Vec<Status>) -> Self {
        Self {
            samples,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusAccessor for ScriptedAccessor {
    async fn get_status(&self, _resource_id: &str) -> anyhow::Result<Status> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let index = n.min(self.samples.len().saturating_sub(1));
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no samples"))
    }
}

/// Answers the given samples, then never answers again.
pub struct HangingAccessor {
    answers: Vec<Status>,
    calls: AtomicU32,
}

impl HangingAccessor {
    pub fn new(answers: Vec<Status>) -> Self {
        Self {
            answers,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StatusAccessor for HangingAccessor {
    async fn get_status(&self, _resource_id: &str) -> anyhow::Result<Status> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.answers.get(n) {
            Some(status) => Ok(status.clone()),
            None => std::future::pending().await,
        }
    }
}

pub fn sample(sync: SyncState, health: HealthState, revision: &str, replicas: u32) -> Status {
    Status::new(sync, health, Some(revision.to_string()), Some(replicas))
}

/// In-memory registry with a switch to make it unreachable.
#[derive(Default)]
pub struct MemoryRegistry {
    components: Mutex<HashMap<(String, String), ComponentId>>,
    unreachable: AtomicBool,
    next_id: AtomicU32,
    pub publishes: AtomicU32,
    pub deletes: AtomicU32,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn contains(&self, artifact_id: &str, version: &str) -> bool {
        self.components
            .lock()
            .unwrap()
            .contains_key(&(artifact_id.to_string(), version.to_string()))
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unreachable(
                "error sending request: connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for MemoryRegistry {
    async fn publish(
        &self,
        artifact_id: &str,
        version: &str,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<PublishedArtifact, RegistryError> {
        self.check()?;
        self.publishes.fetch_add(1, Ordering::SeqCst);
        let id = ComponentId(format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.components
            .lock()
            .unwrap()
            .insert((artifact_id.to_string(), version.to_string()), id.clone());
        Ok(PublishedArtifact {
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            component: Some(id),
        })
    }

    async fn search(
        &self,
        artifact_id: &str,
        version: &str,
    ) -> Result<Option<ComponentId>, RegistryError> {
        self.check()?;
        Ok(self
            .components
            .lock()
            .unwrap()
            .get(&(artifact_id.to_string(), version.to_string()))
            .cloned())
    }

    async fn delete(&self, component: &ComponentId) -> Result<(), RegistryError> {
        self.check()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.components.lock().unwrap().retain(|_, id| id != component);
        Ok(())
    }
}

/// Writes a placeholder archive named after the chart metadata.
#[derive(Default)]
pub struct FakePackager {
    pub fail: AtomicBool,
}

#[async_trait]
impl Packager for FakePackager {
    async fn package(&self, chart_dir: &Path, dest: &Path) -> anyhow::Result<PackagedArtifact> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("helm package failed: chart is broken");
        }
        let (name, version) = read_chart_meta(chart_dir)?;
        std::fs::create_dir_all(dest)?;
        let path = dest.join(format!("{name}-{version}.tgz"));
        std::fs::write(&path, format!("{name} {version}"))?;
        Ok(PackagedArtifact {
            path,
            name,
            version,
        })
    }
}
