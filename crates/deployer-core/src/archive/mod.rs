//! Artifact staging: unpack a build's zip archive into a clean directory.

use std::path::{Path, PathBuf};

/// A top-level entry found directly inside the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    /// Directory the archive was extracted into
    pub staging_dir: PathBuf,
    /// Top-level entries, sorted by file name
    pub entries: Vec<StagedEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact is not a readable zip archive: {0}")]
    Invalid(#[source] zip::result::ZipError),

    #[error("zip entry {name:?} declares {declared} bytes but holds {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("failed to read zip entry {index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: zip::result::ZipError,
    },
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io {
        action,
        path,
        source,
    }
}

/// Owns the staging directory and fills it from artifact bytes.
#[derive(Debug, Clone)]
pub struct ArchiveStager {
    staging_dir: PathBuf,
}

impl ArchiveStager {
    pub fn new(staging_dir: PathBuf) -> Self {
        Self { staging_dir }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Reset the staging directory and extract `data` into it.
    ///
    /// On failure the staging directory is left as it is, so a half-extracted
    /// archive can be inspected.
    pub fn stage(&self, data: &[u8]) -> Result<StagedArtifact, ArchiveError> {
        self.reset()?;
        extract(data, &self.staging_dir)?;

        let entries = list_entries(&self.staging_dir)?;
        tracing::debug!(
            staging_dir = %self.staging_dir.display(),
            entries = entries.len(),
            "artifact staged"
        );

        Ok(StagedArtifact {
            staging_dir: self.staging_dir.clone(),
            entries,
        })
    }

    fn reset(&self) -> Result<(), ArchiveError> {
        if self.staging_dir.exists() {
            std::fs::remove_dir_all(&self.staging_dir)
                .map_err(io_error("remove staging directory", &self.staging_dir))?;
        }
        std::fs::create_dir_all(&self.staging_dir)
            .map_err(io_error("create staging directory", &self.staging_dir))
    }
}

/// Extract a zip archive held in memory to `dest`.
fn extract(data: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let cursor = std::io::Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor).map_err(ArchiveError::Invalid)?;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|source| ArchiveError::Entry { index, source })?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => {
                tracing::warn!(entry = file.name(), "skipping zip entry with unsafe path");
                continue;
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(io_error("create directory", &outpath))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(io_error("create directory", parent))?;
        }

        let mut out =
            std::fs::File::create(&outpath).map_err(io_error("create file", &outpath))?;
        let written = std::io::copy(&mut file, &mut out)
            .map_err(io_error("extract zip entry to", &outpath))?;
        if written != file.size() {
            return Err(ArchiveError::SizeMismatch {
                name: file.name().to_string(),
                declared: file.size(),
                actual: written,
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                // Best effort.
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}

fn list_entries(dir: &Path) -> Result<Vec<StagedEntry>, ArchiveError> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error("read staging directory", dir))? {
        let entry = entry.map_err(io_error("read entry in", dir))?;
        let file_type = entry
            .file_type()
            .map_err(io_error("stat", &entry.path()))?;
        entries.push(StagedEntry {
            path: entry.path(),
            is_dir: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
