//! Versioned artifact registry.

mod nexus;

use async_trait::async_trait;

pub use nexus::NexusRegistry;

use crate::error::FailureKind;
use crate::retry::classify_http_status;

/// Registry-assigned identity of one stored component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentId(pub String);

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the registry accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub artifact_id: String,
    pub version: String,
    pub component: Option<ComponentId>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("registry returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("unexpected registry response: {0}")]
    Decode(String),
}

impl RegistryError {
    pub fn classify(&self) -> Option<FailureKind> {
        match self {
            Self::Unreachable(_) => Some(FailureKind::TransientOther),
            Self::Status { code, .. } => Some(classify_http_status(*code)),
            Self::Decode(_) => Some(FailureKind::Terminal),
        }
    }
}

#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    async fn publish(
        &self,
        artifact_id: &str,
        version: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<PublishedArtifact, RegistryError>;

    /// Exact `{artifact_id, version}` lookup; never "latest".
    async fn search(
        &self,
        artifact_id: &str,
        version: &str,
    ) -> Result<Option<ComponentId>, RegistryError>;

    /// Delete by identity. A component that is already gone is not an error.
    async fn delete(&self, component: &ComponentId) -> Result<(), RegistryError>;
}
