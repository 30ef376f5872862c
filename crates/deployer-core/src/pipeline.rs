//! Deployment pipeline: gate, CI lookups, staging, target resolution, swap.
//!
//! Every step waits for the previous one and the first rejection or failure
//! ends the run. Staging and the swap share one process-wide lock because the
//! staging directory is a single location on disk and two swaps onto the same
//! target must not interleave.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::json;
use tokio::sync::Mutex;

use crate::archive::{ArchiveError, ArchiveStager};
use crate::ci::{BuildRef, CiClient, CiError, ProjectRef};
use crate::config::DeployerConfig;
use crate::fs::{SwapError, SwapShape, swap};
use crate::gate::{EventGate, InboundEvent, Rejection};
use crate::target::{TargetResolver, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("CI API lookup failed: {0}")]
    Ci(#[from] CiError),

    #[error("artifact staging failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("target path could not be resolved: {0}")]
    Template(#[from] TemplateError),

    #[error("directory swap failed: {0}")]
    Swap(#[from] SwapError),

    #[error("deployment worker stopped unexpectedly: {0}")]
    Worker(String),
}

impl DeployError {
    pub fn is_empty_artifact(&self) -> bool {
        matches!(self, DeployError::Swap(SwapError::EmptyArtifact { .. }))
    }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum DeploymentOutcome {
    Deployed(PathBuf),
    Rejected(Rejection),
    Failed(DeployError),
}

/// Staging and placement, run on a blocking thread under the deploy lock.
#[derive(Debug)]
struct Placement {
    stager: ArchiveStager,
    resolver: TargetResolver,
}

impl Placement {
    fn place(
        &self,
        artifact: &[u8],
        event: &InboundEvent,
        project: &ProjectRef,
        build: &BuildRef,
    ) -> Result<(PathBuf, SwapShape), DeployError> {
        let staged = self.stager.stage(artifact)?;
        let target = self.resolver.resolve(event, project, build)?;
        let shape = swap(&staged, &target)?;
        Ok((target, shape))
    }
}

pub struct Pipeline {
    ci: Arc<dyn CiClient>,
    gate: EventGate,
    placement: Arc<Placement>,
    deploy_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("gate", &self.gate)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(config: &DeployerConfig, ci: Arc<dyn CiClient>) -> Self {
        let stager = ArchiveStager::new(config.staging_dir.clone());
        let resolver = TargetResolver::new(config.target_dir.clone(), config.staging_dir.clone());
        Self {
            ci,
            gate: EventGate::from_config(config),
            placement: Arc::new(Placement { stager, resolver }),
            deploy_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Handle one webhook request.
    pub async fn handle(&self, body: &[u8], headers: &HeaderMap) -> DeploymentOutcome {
        let (ids, outcome) = match self.gate.admit(body, headers) {
            Ok(event) => (
                Some((event.project_id, event.build_id)),
                self.run(event).await,
            ),
            Err(rejection) => (None, DeploymentOutcome::Rejected(rejection)),
        };
        self.log_outcome(&outcome, ids);
        outcome
    }

    /// Deploy a build without a webhook, e.g. from the command line.
    ///
    /// The token check is skipped; the build-name filter still applies.
    /// `raw_event` feeds `{event.*}` placeholders and needs no ids of its
    /// own; when absent a minimal job event is synthesized from the ids.
    pub async fn deploy_build(
        &self,
        project_id: u64,
        build_id: u64,
        raw_event: Option<serde_json::Value>,
    ) -> DeploymentOutcome {
        let raw = raw_event.unwrap_or_else(|| {
            json!({
                "object_kind": "build",
                "build_status": "success",
                "project_id": project_id,
                "build_id": build_id,
            })
        });

        let outcome = self
            .run(InboundEvent::new(project_id, build_id, raw))
            .await;
        self.log_outcome(&outcome, Some((project_id, build_id)));
        outcome
    }

    async fn run(&self, event: InboundEvent) -> DeploymentOutcome {
        let (project, build) = match self.lookup(&event).await {
            Ok(refs) => refs,
            Err(err) => return DeploymentOutcome::Failed(err),
        };

        if let Err(rejection) = self.gate.check_build(&build) {
            return DeploymentOutcome::Rejected(rejection);
        }

        match self.install(event, project, build).await {
            Ok(target) => DeploymentOutcome::Deployed(target),
            Err(err) => DeploymentOutcome::Failed(err),
        }
    }

    async fn lookup(&self, event: &InboundEvent) -> Result<(ProjectRef, BuildRef), DeployError> {
        let project = self.ci.project(event.project_id).await?;
        let build = self.ci.build(event.project_id, event.build_id).await?;
        Ok((project, build))
    }

    async fn install(
        &self,
        event: InboundEvent,
        project: ProjectRef,
        build: BuildRef,
    ) -> Result<PathBuf, DeployError> {
        let artifact = self.ci.artifact(event.project_id, build.id).await?;
        tracing::debug!(
            project_id = project.id,
            build_id = build.id,
            bytes = artifact.len(),
            "artifact downloaded"
        );

        // The guard moves into the worker so the lock is held until the swap
        // finishes, even if the request future is dropped meanwhile.
        let guard = Arc::clone(&self.deploy_lock).lock_owned().await;
        let placement = Arc::clone(&self.placement);

        let (target, shape) = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            placement.place(&artifact, &event, &project, &build)
        })
        .await
        .map_err(|e| DeployError::Worker(e.to_string()))??;

        tracing::debug!(path = %target.display(), ?shape, "target replaced");
        Ok(target)
    }

    fn log_outcome(&self, outcome: &DeploymentOutcome, ids: Option<(u64, u64)>) {
        let project_id = ids.map(|(project, _)| project);
        let build_id = ids.map(|(_, build)| build);

        match outcome {
            DeploymentOutcome::Deployed(target) => {
                tracing::info!(project_id, build_id, path = %target.display(), "artifact deployed");
            }
            DeploymentOutcome::Rejected(Rejection::Unauthorized) => {
                tracing::warn!("rejected webhook with missing or unknown token");
            }
            DeploymentOutcome::Rejected(rejection) => {
                tracing::debug!(project_id, build_id, %rejection, "event not deployed");
            }
            DeploymentOutcome::Failed(err) => {
                tracing::error!(
                    project_id,
                    build_id,
                    template = self.placement.resolver.template().as_str(),
                    error = %err,
                    "deployment failed"
                );
            }
        }
    }
}
