//! Config store for locating and loading selsync.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{SelsyncConfig, parser};

pub const CONFIG_FILE_NAME: &str = "selsync.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Resolve the config path: explicit path, then `./selsync.toml`,
    /// then the user config directory.
    pub fn discover(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok(Self::from_path(path));
        }

        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let global_dir = dirs::config_dir().map(|p| p.join("selsync"));
        Ok(Self::from_path(Self::resolve(&cwd, global_dir.as_deref())))
    }

    fn resolve(project_root: &Path, global_dir: Option<&Path>) -> PathBuf {
        let local = project_root.join(CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }
        match global_dir {
            Some(dir) if dir.join(CONFIG_FILE_NAME).exists() => dir.join(CONFIG_FILE_NAME),
            _ => local,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, falling back to defaults when the file is absent.
    pub fn load(&self) -> anyhow::Result<SelsyncConfig> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "no config file, using defaults");
            return Ok(SelsyncConfig::new());
        }
        parser::parse_selsync_toml(&self.config_path)
    }
}
