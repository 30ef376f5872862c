//! Shared fixtures: in-memory artifacts, canned CI data, temp deploy roots.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use axum::http::{HeaderMap, HeaderValue};
use deployer_core::ci::{BuildRef, ProjectRef};
use deployer_core::config::{ConfigFile, DeployerConfig, env};
use deployer_core::gate::TOKEN_HEADER;
use serde_json::{Value, json};
use tempfile::TempDir;

pub const TOKEN: &str = "hook-secret";
pub const PROJECT_ID: u64 = 42;
pub const BUILD_ID: u64 = 1001;

/// Build a zip archive in memory. Names ending in `/` become directories.
pub fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

pub fn project() -> ProjectRef {
    ProjectRef {
        id: PROJECT_ID,
        name: "My Site".to_string(),
        path: "my-site".to_string(),
        path_with_namespace: "web/my-site".to_string(),
    }
}

pub fn build(id: u64, name: &str) -> BuildRef {
    BuildRef {
        id,
        ref_name: "feature/New UI".to_string(),
        name: name.to_string(),
        stage: "deploy".to_string(),
        tag: false,
    }
}

pub fn build_event(build_id: u64) -> Value {
    json!({
        "object_kind": "build",
        "build_status": "success",
        "build_name": "pages",
        "project_id": PROJECT_ID,
        "build_id": build_id,
        "user": { "username": "octo" },
    })
}

pub fn body_of(event: &Value) -> Vec<u8> {
    serde_json::to_vec(event).unwrap()
}

pub fn token_headers(token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(TOKEN_HEADER, HeaderValue::from_str(token).unwrap());
    }
    headers
}

/// A temp root holding `staging/` and `www/`.
pub struct DeployRoot {
    pub temp: TempDir,
}

impl DeployRoot {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn www(&self) -> PathBuf {
        self.path().join("www")
    }

    /// Where the default template puts builds of [`project`] / [`build`].
    pub fn default_target(&self) -> PathBuf {
        self.www().join("my-site").join("feature-new-ui")
    }

    pub fn config(&self, build_name: Option<&str>) -> DeployerConfig {
        let template = format!(
            "{}/{{slug_project_name}}/{{slug_build_ref}}",
            self.www().display()
        );
        self.config_with_template(&template, build_name)
    }

    pub fn config_with_template(&self, template: &str, build_name: Option<&str>) -> DeployerConfig {
        let staging = self.path().join("staging").display().to_string();
        let template = template.to_string();
        let build_name = build_name.map(str::to_string);
        DeployerConfig::from_sources(ConfigFile::default(), move |key| match key {
            env::GITLAB_API_TOKEN => Some("glpat-test".to_string()),
            env::WEBHOOK_TOKENS => Some(format!("other,{TOKEN}")),
            env::TARGET_DIR => Some(template.clone()),
            env::STAGING_DIR => Some(staging.clone()),
            env::BUILD_NAME => build_name.clone(),
            _ => None,
        })
        .unwrap()
    }
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
