//! Status sampling of externally managed resources.

mod kubectl;

use std::sync::Arc;

use async_trait::async_trait;

pub use kubectl::{KubectlStatusAccessor, parse_application_status, parse_ready_replicas};

use crate::types::Status;

/// Reads the status fields of one resource from the orchestration platform.
///
/// Implementations may return partially known samples.
#[async_trait]
pub trait StatusAccessor: Send + Sync {
    async fn get_status(&self, resource_id: &str) -> anyhow::Result<Status>;
}

/// Pure status query that never fails.
///
/// Accessor errors are logged and reported as an all-unknown sample; the
/// polling loop re-samples on the next tick.
#[derive(Clone)]
pub struct StatusProbe {
    accessor: Arc<dyn StatusAccessor>,
}

impl std::fmt::Debug for StatusProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusProbe").finish_non_exhaustive()
    }
}

impl StatusProbe {
    pub fn new(accessor: Arc<dyn StatusAccessor>) -> Self {
        Self { accessor }
    }

    pub async fn fetch(&self, resource_id: &str) -> Status {
        match self.accessor.get_status(resource_id).await {
            Ok(status) => status,
            Err(err) => {
                tracing::debug!(resource = resource_id, error = %err, "status fetch failed");
                Status::unknown()
            }
        }
    }
}
