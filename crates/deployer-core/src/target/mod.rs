//! Target directory resolution from the configured path template.

pub mod slug;
pub mod template;

use std::path::{Component, Path, PathBuf};

use crate::ci::{BuildRef, ProjectRef};
use crate::gate::InboundEvent;

pub use slug::slugify;
pub use template::{PathTemplate, Placeholder, SubstitutionContext};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template {template:?} at byte {position}: {message}")]
    Syntax {
        template: String,
        position: usize,
        message: String,
    },

    #[error("unknown placeholder {{{name}}}")]
    UnknownPlaceholder { name: String },

    #[error("event payload has no value at '{path}'")]
    MissingEventField { path: String },

    #[error("event payload value at '{path}' is not a string, number or boolean")]
    NonScalarEventField { path: String },

    #[error("target path is not absolute: {path}")]
    NotAbsolute { path: String },

    #[error("target path escapes its template via '..': {path}")]
    PathTraversal { path: String },

    #[error("target path {path} overlaps the staging directory {staging}")]
    OverlapsStaging { path: String, staging: String },
}

/// Renders and validates target paths.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    template: PathTemplate,
    staging_dir: PathBuf,
}

impl TargetResolver {
    pub fn new(template: PathTemplate, staging_dir: PathBuf) -> Self {
        Self {
            template,
            staging_dir,
        }
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn resolve(
        &self,
        event: &InboundEvent,
        project: &ProjectRef,
        build: &BuildRef,
    ) -> Result<PathBuf, TemplateError> {
        let ctx = SubstitutionContext::new(&event.raw, project, build);
        let rendered = self.template.render(&ctx)?;
        let target = PathBuf::from(&rendered);
        self.validate(&target)?;
        Ok(target)
    }

    fn validate(&self, target: &Path) -> Result<(), TemplateError> {
        let display = || target.display().to_string();

        if !target.is_absolute() {
            return Err(TemplateError::NotAbsolute { path: display() });
        }
        if target.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(TemplateError::PathTraversal { path: display() });
        }
        // Lexical comparison; both paths come from configuration and the
        // rendered template, neither is canonicalized.
        if target.starts_with(&self.staging_dir) || self.staging_dir.starts_with(target) {
            return Err(TemplateError::OverlapsStaging {
                path: display(),
                staging: self.staging_dir.display().to_string(),
            });
        }
        Ok(())
    }
}
