//! Deployer Core Library
//!
//! Receives GitLab job webhooks, downloads the build artifact of successful
//! jobs and swaps its contents into a directory derived from a path template.

pub mod archive;
pub mod ci;
pub mod config;
pub mod fs;
pub mod gate;
pub mod pipeline;
pub mod server;
pub mod target;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigFile, DeployerConfig, GitLabConfig};

    // Webhook intake
    pub use crate::gate::{EventGate, InboundEvent, Rejection};

    // CI API
    pub use crate::ci::{BuildRef, CiClient, CiError, GitLabClient, ProjectRef};

    // Placement
    pub use crate::archive::{ArchiveStager, StagedArtifact};
    pub use crate::fs::{SwapShape, swap};
    pub use crate::target::{PathTemplate, TargetResolver, TemplateError};

    // Pipeline
    pub use crate::pipeline::{DeployError, DeploymentOutcome, Pipeline};
    pub use crate::server::{AppState, router};
}
