//! CI platform access: project and build metadata plus artifact download.

pub mod fakes;
pub mod gitlab;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gitlab::GitLabClient;

/// Project metadata as returned by the CI API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_with_namespace: String,
}

/// Build (job) metadata as returned by the CI API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    pub id: u64,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub name: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub tag: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CiError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid CI API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("CI API returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Read-only view of the CI platform used by the deployment pipeline.
#[async_trait]
pub trait CiClient: Send + Sync {
    async fn project(&self, project_id: u64) -> Result<ProjectRef, CiError>;

    async fn build(&self, project_id: u64, build_id: u64) -> Result<BuildRef, CiError>;

    /// Raw bytes of the build's artifact archive.
    async fn artifact(&self, project_id: u64, build_id: u64) -> Result<Vec<u8>, CiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_ref_deserializes_gitlab_job() {
        let job = r#"{
            "id": 8,
            "name": "pages",
            "ref": "main",
            "stage": "deploy",
            "status": "success",
            "tag": false,
            "artifacts_file": { "filename": "artifacts.zip", "size": 1000 }
        }"#;
        let build: BuildRef = serde_json::from_str(job).unwrap();
        assert_eq!(build.id, 8);
        assert_eq!(build.ref_name, "main");
        assert_eq!(build.stage, "deploy");
    }

    #[test]
    fn project_ref_deserializes_gitlab_project() {
        let project = r#"{
            "id": 3,
            "name": "Diaspora Client",
            "path": "diaspora-client",
            "path_with_namespace": "diaspora/diaspora-client",
            "default_branch": "main"
        }"#;
        let project: ProjectRef = serde_json::from_str(project).unwrap();
        assert_eq!(project.name, "Diaspora Client");
        assert_eq!(project.path_with_namespace, "diaspora/diaspora-client");
    }
}
