//! Status accessor backed by `kubectl get -o json`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::StatusAccessor;
use crate::config::{ResourceConfig, StatusSection};
use crate::types::{HealthState, Status, SyncState};

#[derive(Debug, Clone)]
struct Lookup {
    namespace: String,
    workload: String,
    workload_namespace: String,
}

/// Reads sync/health/revision from the controller's application object and
/// ready replicas from the workload's deployment.
#[derive(Debug, Clone)]
pub struct KubectlStatusAccessor {
    settings: StatusSection,
    resources: HashMap<String, Lookup>,
}

impl KubectlStatusAccessor {
    pub fn new(settings: StatusSection, resources: &[ResourceConfig]) -> Self {
        let resources = resources
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    Lookup {
                        namespace: r.namespace.clone(),
                        workload: r.workload_name().to_string(),
                        workload_namespace: r.workload_namespace.clone(),
                    },
                )
            })
            .collect();
        Self {
            settings,
            resources,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.request_timeout_secs.max(1))
    }

    async fn get_json(&self, kind: &str, name: &str, namespace: &str) -> anyhow::Result<Value> {
        let timeout = self.timeout();
        let mut cmd = Command::new(&self.settings.kubectl);
        if let Some(context) = &self.settings.context {
            cmd.args(["--context", context]);
        }
        cmd.arg(format!("--request-timeout={}s", timeout.as_secs()))
            .args(["get", kind, name, "-n", namespace, "-o", "json"])
            .kill_on_drop(true);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "kubectl get {} {} timed out after {}s",
                    kind,
                    name,
                    timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to run {} get {}", self.settings.kubectl, kind))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("kubectl get {} {} failed: {}", kind, name, stderr.trim());
        }
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("kubectl returned invalid JSON for {} {}", kind, name))
    }
}

#[async_trait]
impl StatusAccessor for KubectlStatusAccessor {
    async fn get_status(&self, resource_id: &str) -> anyhow::Result<Status> {
        let lookup = self
            .resources
            .get(resource_id)
            .ok_or_else(|| anyhow::anyhow!("Resource not configured: {}", resource_id))?;

        let app = self
            .get_json(&self.settings.application_kind, resource_id, &lookup.namespace)
            .await;
        let deployment = self
            .get_json("deployment", &lookup.workload, &lookup.workload_namespace)
            .await;

        if let (Err(app_err), Err(_)) = (&app, &deployment) {
            anyhow::bail!("status unavailable for {}: {}", resource_id, app_err);
        }

        let mut status = match &app {
            Ok(value) => parse_application_status(value),
            Err(err) => {
                tracing::debug!(resource = resource_id, error = %err, "application status unavailable");
                Status::unknown()
            }
        };
        status.observed_replica_count = match &deployment {
            Ok(value) => parse_ready_replicas(value),
            Err(err) => {
                tracing::debug!(resource = resource_id, error = %err, "workload status unavailable");
                None
            }
        };
        Ok(status)
    }
}

/// Extract sync state, health state and observed revision from an
/// application object. Missing or malformed fields become unknown.
pub fn parse_application_status(value: &Value) -> Status {
    let status = value.get("status");
    let text = |path: &[&str]| text_at(status, path);

    Status {
        sync_state: text(&["sync", "status"])
            .map(SyncState::from_label)
            .unwrap_or_default(),
        health_state: text(&["health", "status"])
            .map(HealthState::from_label)
            .unwrap_or_default(),
        observed_revision: text(&["sync", "revision"])
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        observed_replica_count: None,
    }
}

fn text_at<'a>(root: Option<&'a Value>, path: &[&str]) -> Option<&'a str> {
    let mut cur = root?;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

/// Ready replicas of a deployment object.
///
/// A deployment with a status block but no `readyReplicas` has zero ready.
pub fn parse_ready_replicas(value: &Value) -> Option<u32> {
    let status = value.get("status")?.as_object()?;
    match status.get("readyReplicas") {
        Some(v) => v.as_u64().and_then(|n| u32::try_from(n).ok()),
        None => Some(0),
    }
}
