//! Configuration schema for selsync.toml

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::DetectorConfig;
use crate::retry::RetryConfig;

/// Root configuration structure for selsync.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelsyncConfig {
    #[serde(default)]
    pub repository: RepositorySection,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub status: StatusSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub detector: DetectorSection,

    #[serde(default)]
    pub demo: DemoSection,

    /// Resources managed through the source repository
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

impl SelsyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if resource.id.trim().is_empty() {
                anyhow::bail!("Resource id must not be empty");
            }
            if !seen.insert(resource.id.as_str()) {
                anyhow::bail!("Duplicate resource id: {}", resource.id);
            }
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.detector.detection_interval_secs == 0 || self.detector.convergence_interval_secs == 0
        {
            anyhow::bail!("detector polling intervals must be at least 1 second");
        }
        Ok(())
    }
}

/// Source-of-truth repository the change commits land in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySection {
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Skip `git push` (local-only demos and tests)
    #[serde(default)]
    pub push: PushMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    #[default]
    Enabled,
    Disabled,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            remote: default_remote(),
            branch: default_branch(),
            push: PushMode::Enabled,
        }
    }
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

/// HTTP package registry (Nexus REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    #[serde(default = "default_registry_url")]
    pub url: String,
    #[serde(default = "default_registry_repository")]
    pub repository: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Name of the environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            repository: default_registry_repository(),
            username: None,
            password_env: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_registry_repository() -> String {
    "helm-hosted".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// How status is read from the orchestration platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSection {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Kind of the status-bearing resource
    #[serde(default = "default_application_kind")]
    pub application_kind: String,
    /// Upper bound on one kubectl call
    #[serde(default = "default_status_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            context: None,
            application_kind: default_application_kind(),
            request_timeout_secs: default_status_timeout_secs(),
        }
    }
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_application_kind() -> String {
    "applications.argoproj.io".to_string()
}

fn default_status_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_true")]
    pub retry_transient_network: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            retry_transient_network: true,
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            retry_transient_other: self.retry_transient_network,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSection {
    #[serde(default = "default_detection_interval_secs")]
    pub detection_interval_secs: u64,
    #[serde(default = "default_detection_timeout_secs")]
    pub detection_timeout_secs: u64,
    #[serde(default = "default_convergence_interval_secs")]
    pub convergence_interval_secs: u64,
    #[serde(default = "default_convergence_timeout_secs")]
    pub convergence_timeout_secs: u64,
    #[serde(default = "default_settle_window_secs")]
    pub settle_window_secs: u64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            detection_interval_secs: default_detection_interval_secs(),
            detection_timeout_secs: default_detection_timeout_secs(),
            convergence_interval_secs: default_convergence_interval_secs(),
            convergence_timeout_secs: default_convergence_timeout_secs(),
            settle_window_secs: default_settle_window_secs(),
        }
    }
}

impl DetectorSection {
    pub fn to_detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            detection_interval: Duration::from_secs(self.detection_interval_secs),
            detection_timeout: Duration::from_secs(self.detection_timeout_secs),
            convergence_interval: Duration::from_secs(self.convergence_interval_secs),
            convergence_timeout: Duration::from_secs(self.convergence_timeout_secs),
            settle_window: Duration::from_secs(self.settle_window_secs),
        }
    }
}

fn default_detection_interval_secs() -> u64 {
    1
}

fn default_detection_timeout_secs() -> u64 {
    30
}

fn default_convergence_interval_secs() -> u64 {
    2
}

fn default_convergence_timeout_secs() -> u64 {
    120
}

fn default_settle_window_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoSection {
    /// Resource the demo changes
    #[serde(default = "default_demo_target")]
    pub target: String,
    /// Sibling resource that must stay untouched
    #[serde(default)]
    pub control: Option<String>,
    /// Where packaged artifacts are written before publishing
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,
}

impl Default for DemoSection {
    fn default() -> Self {
        Self {
            target: default_demo_target(),
            control: None,
            package_dir: default_package_dir(),
        }
    }
}

fn default_demo_target() -> String {
    "svcA".to_string()
}

fn default_package_dir() -> PathBuf {
    PathBuf::from(".selsync/packages")
}

/// One resource whose parameters live in the source repository.
///
/// Paths are relative to the repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: String,
    /// Namespace of the status-bearing resource
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub chart_dir: PathBuf,
    #[serde(default)]
    pub values_file: Option<PathBuf>,
    #[serde(default = "default_replica_key")]
    pub replica_key: String,
    #[serde(default)]
    pub chart_file: Option<PathBuf>,
    /// Manifest telling the controller which version to pull
    pub pointer_file: PathBuf,
    #[serde(default = "default_pointer_key")]
    pub pointer_key: String,
    /// Workload whose replicas are observed (defaults to the id)
    #[serde(default)]
    pub workload: Option<String>,
    #[serde(default = "default_workload_namespace")]
    pub workload_namespace: String,
}

impl ResourceConfig {
    pub fn new(
        id: impl Into<String>,
        chart_dir: impl Into<PathBuf>,
        pointer_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            namespace: default_namespace(),
            chart_dir: chart_dir.into(),
            values_file: None,
            replica_key: default_replica_key(),
            chart_file: None,
            pointer_file: pointer_file.into(),
            pointer_key: default_pointer_key(),
            workload: None,
            workload_namespace: default_workload_namespace(),
        }
    }

    pub fn values_path(&self) -> PathBuf {
        self.values_file
            .clone()
            .unwrap_or_else(|| self.chart_dir.join("values.yaml"))
    }

    pub fn chart_path(&self) -> PathBuf {
        self.chart_file
            .clone()
            .unwrap_or_else(|| self.chart_dir.join("Chart.yaml"))
    }

    pub fn pointer_path(&self) -> &Path {
        &self.pointer_file
    }

    pub fn workload_name(&self) -> &str {
        self.workload.as_deref().unwrap_or(&self.id)
    }
}

fn default_namespace() -> String {
    "argocd".to_string()
}

fn default_replica_key() -> String {
    "replicaCount".to_string()
}

fn default_pointer_key() -> String {
    "spec.source.targetRevision".to_string()
}

fn default_workload_namespace() -> String {
    "default".to_string()
}
