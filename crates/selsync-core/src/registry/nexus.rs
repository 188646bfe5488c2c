//! Nexus repository manager REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use url::Url;

use super::{ArtifactRegistry, ComponentId, PublishedArtifact, RegistryError};

const API_PREFIX: &str = "service/rest/v1";

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NexusRegistry {
    client: reqwest::Client,
    base: Url,
    repository: String,
    credentials: Option<(String, String)>,
}

impl NexusRegistry {
    pub fn new(
        base_url: &str,
        repository: impl Into<String>,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid registry URL '{}': {}", base_url, e))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("selsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base,
            repository: repository.into(),
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        self.base
            .join(&format!("{}/{}", API_PREFIX, path))
            .map_err(|e| RegistryError::Decode(format!("bad endpoint {}: {}", path, e)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RegistryError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))
    }

    async fn failure(response: reqwest::Response) -> RegistryError {
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        RegistryError::Status {
            code,
            body: body.chars().take(200).collect(),
        }
    }
}

#[async_trait]
impl ArtifactRegistry for NexusRegistry {
    async fn publish(
        &self,
        artifact_id: &str,
        version: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<PublishedArtifact, RegistryError> {
        let url = self.endpoint("components")?;
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("helm.asset", part);
        let request = self
            .client
            .post(url)
            .query(&[("repository", self.repository.as_str())])
            .multipart(form);

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        tracing::info!(artifact = artifact_id, version, "published artifact");

        let component = self.search(artifact_id, version).await?;
        Ok(PublishedArtifact {
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            component,
        })
    }

    async fn search(
        &self,
        artifact_id: &str,
        version: &str,
    ) -> Result<Option<ComponentId>, RegistryError> {
        let url = self.endpoint("search")?;
        let request = self.client.get(url).query(&[
            ("repository", self.repository.as_str()),
            ("name", artifact_id),
            ("version", version),
        ]);
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        let page: SearchPage = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        Ok(page
            .items
            .into_iter()
            .find(|item| item.name == artifact_id && item.version.as_deref() == Some(version))
            .map(|item| ComponentId(item.id)))
    }

    async fn delete(&self, component: &ComponentId) -> Result<(), RegistryError> {
        let url = self.endpoint(&format!("components/{}", component.0))?;
        let response = self.send(self.client.delete(url)).await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(component = %component, "deleted component");
            return Ok(());
        }
        Err(Self::failure(response).await)
    }
}
