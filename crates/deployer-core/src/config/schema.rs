//! Configuration schema for deployer.toml
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! webhook_tokens = ["first-secret", "second-secret"]
//! target_dir = "/srv/www/{slug_project_name}/{slug_build_ref}"
//! build_name = "pages"
//! staging_dir = "/var/tmp/deployer"
//! respond_with_body = true
//! debug = false
//!
//! [gitlab]
//! server = "https://gitlab.com"
//! api_token = "glpat-..."
//! ```
//!
//! Every key is optional in the file; environment variables can supply or
//! override them before validation.

use serde::{Deserialize, Serialize};

/// Root structure of deployer.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Socket address the webhook listener binds to
    #[serde(default)]
    pub listen: Option<String>,

    /// Shared secrets accepted in the X-Gitlab-Token header
    #[serde(default)]
    pub webhook_tokens: Vec<String>,

    /// Target directory template
    #[serde(default)]
    pub target_dir: Option<String>,

    /// Only deploy builds (jobs) with this name
    #[serde(default)]
    pub build_name: Option<String>,

    /// Scratch directory artifacts are extracted into
    #[serde(default)]
    pub staging_dir: Option<String>,

    /// Answer successful deployments with "Artifact deployed"
    #[serde(default)]
    pub respond_with_body: Option<bool>,

    /// Verbose logging
    #[serde(default)]
    pub debug: Option<bool>,

    #[serde(default)]
    pub gitlab: GitLabSection,
}

/// `[gitlab]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitLabSection {
    /// Instance root URL
    #[serde(default)]
    pub server: Option<String>,

    /// Private token used for API requests
    #[serde(default)]
    pub api_token: Option<String>,
}
