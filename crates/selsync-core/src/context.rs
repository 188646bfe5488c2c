//! Application context for dependency injection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::cleanup::CompensatingCleanup;
use crate::config::{ConfigStore, RepositorySection, SelsyncConfig};
use crate::detector::PhaseDetector;
use crate::driver::ChangeDriver;
use crate::manifest::YamlParameterStore;
use crate::orchestrator::DemoOrchestrator;
use crate::package::HelmPackager;
use crate::probe::{KubectlStatusAccessor, StatusProbe};
use crate::records::{GitRecordStore, RecordStore};
use crate::registry::NexusRegistry;
use crate::retry::RetryingExecutor;
use crate::ticker::Ticker;

/// Wires concrete collaborators from one loaded configuration.
///
/// Frontends create this once and ask it for the components they need.
/// Relative paths in the configuration resolve against the directory of the
/// configuration file.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: SelsyncConfig,
    config_path: PathBuf,
    cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: SelsyncConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
            cancel: CancellationToken::new(),
        }
    }

    /// Discover and load the configuration file.
    pub fn load(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let store = ConfigStore::discover(explicit)?;
        let config = store.load()?;
        Ok(Self::new(config, store.config_path().to_path_buf()))
    }

    /// Share `token` with every polling loop built from this context.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SelsyncConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn base_dir(&self) -> PathBuf {
        match self.config_path.parent() {
            Some(dir) if self.config_path.exists() && !dir.as_os_str().is_empty() => {
                dir.to_path_buf()
            }
            _ => PathBuf::from("."),
        }
    }

    pub fn repository_settings(&self) -> RepositorySection {
        let mut settings = self.config.repository.clone();
        if settings.path.is_relative() {
            settings.path = self.base_dir().join(&settings.path);
        }
        settings
    }

    pub fn ticker(&self) -> Ticker {
        Ticker::new(self.cancel.clone())
    }

    pub fn executor(&self) -> RetryingExecutor {
        RetryingExecutor::new(self.config.retry.to_retry_config())
    }

    pub fn status_probe(&self) -> StatusProbe {
        let accessor =
            KubectlStatusAccessor::new(self.config.status.clone(), &self.config.resources);
        StatusProbe::new(Arc::new(accessor))
    }

    pub fn detector(&self) -> PhaseDetector {
        PhaseDetector::new(
            self.status_probe(),
            self.config.detector.to_detector_config(),
            self.ticker(),
        )
    }

    pub fn record_store(&self) -> anyhow::Result<Arc<dyn RecordStore>> {
        Ok(Arc::new(GitRecordStore::open(&self.repository_settings())?))
    }

    /// Registry client with credentials resolved from the environment.
    pub fn registry(&self) -> anyhow::Result<NexusRegistry> {
        let settings = &self.config.registry;
        let credentials = match &settings.username {
            Some(user) => {
                let password = match &settings.password_env {
                    Some(var) => std::env::var(var).with_context(|| {
                        format!("Environment variable {} (registry.password_env) is not set", var)
                    })?,
                    None => String::new(),
                };
                Some((user.clone(), password))
            }
            None => None,
        };
        NexusRegistry::new(
            &settings.url,
            settings.repository.clone(),
            credentials,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn change_driver(&self, records: Arc<dyn RecordStore>) -> anyhow::Result<ChangeDriver> {
        let params = YamlParameterStore::new(records.workdir().to_path_buf());
        Ok(ChangeDriver::new(
            records,
            Arc::new(params),
            Arc::new(HelmPackager::default()),
            Arc::new(self.registry()?),
            self.executor(),
        )
        .with_resources(self.config.resources.clone())
        .with_package_dir(self.config.demo.package_dir.clone()))
    }

    pub fn cleanup(&self, records: Arc<dyn RecordStore>) -> anyhow::Result<CompensatingCleanup> {
        Ok(CompensatingCleanup::new(
            records,
            Arc::new(self.registry()?),
            self.detector(),
            self.executor(),
        )
        .with_package_dir(self.config.demo.package_dir.clone()))
    }

    pub fn orchestrator(&self) -> anyhow::Result<DemoOrchestrator> {
        let records = self.record_store()?;
        Ok(DemoOrchestrator::new(
            self.change_driver(Arc::clone(&records))?,
            self.cleanup(records)?,
            self.detector(),
            self.status_probe(),
        ))
    }
}
