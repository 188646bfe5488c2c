//! Building versioned artifacts from chart sources.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

/// A packaged artifact on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
}

impl PackagedArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}-{}.tgz", self.name, self.version))
    }
}

#[async_trait]
pub trait Packager: Send + Sync {
    /// Package `chart_dir` into `dest`, returning what was actually built.
    async fn package(&self, chart_dir: &Path, dest: &Path) -> anyhow::Result<PackagedArtifact>;
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    name: String,
    version: String,
}

/// Name and version declared by a chart directory.
pub fn read_chart_meta(chart_dir: &Path) -> anyhow::Result<(String, String)> {
    let chart_file = chart_dir.join("Chart.yaml");
    let content = std::fs::read_to_string(&chart_file)
        .with_context(|| format!("Failed to read {}", chart_file.display()))?;
    let meta: ChartMeta = serde_yaml::from_str(&content)
        .with_context(|| format!("Malformed chart metadata: {}", chart_file.display()))?;
    Ok((meta.name, meta.version))
}

/// Packages charts with the `helm` CLI.
#[derive(Debug, Clone)]
pub struct HelmPackager {
    helm: String,
}

impl Default for HelmPackager {
    fn default() -> Self {
        Self {
            helm: "helm".to_string(),
        }
    }
}

impl HelmPackager {
    pub fn new(helm: impl Into<String>) -> Self {
        Self { helm: helm.into() }
    }
}

#[async_trait]
impl Packager for HelmPackager {
    async fn package(&self, chart_dir: &Path, dest: &Path) -> anyhow::Result<PackagedArtifact> {
        std::fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create package directory: {}", dest.display()))?;
        let output = Command::new(&self.helm)
            .arg("package")
            .arg(chart_dir)
            .arg("--destination")
            .arg(dest)
            .output()
            .await
            .with_context(|| format!("Failed to run {} package", self.helm))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("helm package failed: {}", stderr.trim());
        }

        let (name, version) = read_chart_meta(chart_dir)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = parse_package_path(&stdout)
            .unwrap_or_else(|| dest.join(format!("{}-{}.tgz", name, version)));
        if !path.exists() {
            anyhow::bail!("helm reported success but {} is missing", path.display());
        }
        Ok(PackagedArtifact {
            path,
            name,
            version,
        })
    }
}

fn parse_package_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .find_map(|line| line.split_once("saved it to:"))
        .map(|(_, path)| PathBuf::from(path.trim()))
}

/// Remove `file_name` from `dir` if present. Returns whether a file was removed.
pub fn remove_local_package(dir: &Path, file_name: &str) -> anyhow::Result<bool> {
    let path = dir.join(file_name);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)
        .with_context(|| format!("Failed to remove package: {}", path.display()))?;
    Ok(true)
}
