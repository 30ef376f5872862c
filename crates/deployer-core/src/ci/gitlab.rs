//! GitLab v4 REST client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use super::{BuildRef, CiClient, CiError, ProjectRef};

const USER_AGENT: &str = concat!("deployer/", env!("CARGO_PKG_VERSION"));

/// Talks to a GitLab instance with a private API token.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    api_base: Url,
    token: String,
    http: reqwest::Client,
}

impl GitLabClient {
    /// `server` is the instance root, e.g. `https://gitlab.com` or
    /// `https://git.example.com/gitlab`.
    pub fn new(server: &Url, token: impl Into<String>) -> Result<Self, CiError> {
        let mut root = server.clone();
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let api_base = root.join("api/v4/")?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(CiError::Client)?;

        Ok(Self {
            api_base,
            token: token.into(),
            http,
        })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> Result<Url, CiError> {
        Ok(self.api_base.join(path)?)
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, CiError> {
        let response = self
            .http
            .get(url.clone())
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|source| CiError::Http {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CiError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CiError> {
        let url = self.endpoint(path)?;
        let response = self.send(&url).await?;
        response.json().await.map_err(|source| CiError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl CiClient for GitLabClient {
    async fn project(&self, project_id: u64) -> Result<ProjectRef, CiError> {
        self.get_json(&format!("projects/{project_id}")).await
    }

    async fn build(&self, project_id: u64, build_id: u64) -> Result<BuildRef, CiError> {
        self.get_json(&format!("projects/{project_id}/jobs/{build_id}"))
            .await
    }

    async fn artifact(&self, project_id: u64, build_id: u64) -> Result<Vec<u8>, CiError> {
        let url = self.endpoint(&format!("projects/{project_id}/jobs/{build_id}/artifacts"))?;
        let response = self.send(&url).await?;
        let bytes = response.bytes().await.map_err(|source| CiError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}
