//! In-memory CI client (testing only)
//!
//! `FakeCiClient` serves canned projects, builds and artifacts and records
//! every call so tests can assert which lookups a code path performed.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BuildRef, CiClient, CiError, ProjectRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiCall {
    Project(u64),
    Build(u64, u64),
    Artifact(u64, u64),
}

#[derive(Debug, Default)]
pub struct FakeCiClient {
    projects: HashMap<u64, ProjectRef>,
    builds: HashMap<(u64, u64), BuildRef>,
    artifacts: HashMap<(u64, u64), Vec<u8>>,
    calls: Mutex<Vec<CiCall>>,
}

impl FakeCiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: ProjectRef) -> Self {
        self.projects.insert(project.id, project);
        self
    }

    pub fn with_build(mut self, project_id: u64, build: BuildRef) -> Self {
        self.builds.insert((project_id, build.id), build);
        self
    }

    pub fn with_artifact(mut self, project_id: u64, build_id: u64, bytes: Vec<u8>) -> Self {
        self.artifacts.insert((project_id, build_id), bytes);
        self
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<CiCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, call: CiCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    fn not_found(path: String) -> CiError {
        CiError::Status {
            status: 404,
            url: format!("fake://{path}"),
        }
    }
}

#[async_trait]
impl CiClient for FakeCiClient {
    async fn project(&self, project_id: u64) -> Result<ProjectRef, CiError> {
        self.record(CiCall::Project(project_id));
        self.projects
            .get(&project_id)
            .cloned()
            .ok_or_else(|| Self::not_found(format!("projects/{project_id}")))
    }

    async fn build(&self, project_id: u64, build_id: u64) -> Result<BuildRef, CiError> {
        self.record(CiCall::Build(project_id, build_id));
        self.builds
            .get(&(project_id, build_id))
            .cloned()
            .ok_or_else(|| Self::not_found(format!("projects/{project_id}/jobs/{build_id}")))
    }

    async fn artifact(&self, project_id: u64, build_id: u64) -> Result<Vec<u8>, CiError> {
        self.record(CiCall::Artifact(project_id, build_id));
        self.artifacts
            .get(&(project_id, build_id))
            .cloned()
            .ok_or_else(|| {
                Self::not_found(format!("projects/{project_id}/jobs/{build_id}/artifacts"))
            })
    }
}
