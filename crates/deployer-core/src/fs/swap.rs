//! Replace a target directory with staged artifact content.
//!
//! The staged content is first moved to a hidden sibling of the target, then
//! the old target is removed and the sibling renamed into place. Both renames
//! stay on the target's filesystem, so only the remove-then-rename step is
//! exposed to a crash: an interrupted swap can leave the target absent, never
//! half-written.

use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::StagedArtifact;

/// How the staged content was mapped onto the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapShape {
    /// The archive held a single directory; its contents became the target.
    Unwrapped,
    /// The whole staging directory became the target.
    Whole,
}

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("artifact contains no files (staged in {})", .staging_dir.display())]
    EmptyArtifact { staging_dir: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

trait IoContext<T> {
    fn with_context(self, context: impl FnOnce() -> String) -> Result<T, SwapError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_context(self, context: impl FnOnce() -> String) -> Result<T, SwapError> {
        self.map_err(|source| SwapError::Io {
            context: context(),
            source,
        })
    }
}

/// Move staged content to `target`, replacing whatever is there.
///
/// - no entries: [`SwapError::EmptyArtifact`], `target` is not touched
/// - a single directory: that directory becomes `target`
/// - anything else: the staging directory itself becomes `target`
pub fn swap(staged: &StagedArtifact, target: &Path) -> Result<SwapShape, SwapError> {
    let (source, shape) = match staged.entries.as_slice() {
        [] => {
            return Err(SwapError::EmptyArtifact {
                staging_dir: staged.staging_dir.clone(),
            });
        }
        [only] if only.is_dir => (only.path.as_path(), SwapShape::Unwrapped),
        _ => (staged.staging_dir.as_path(), SwapShape::Whole),
    };

    ensure_parent_dir(target)?;
    let tmp = unique_temp_path(target)?;

    if let Err(err) = move_dir(source, &tmp) {
        let _ = fs::remove_dir_all(&tmp);
        return Err(err);
    }

    replace_dst_with_tmp(target, &tmp)?;
    Ok(shape)
}

fn ensure_parent_dir(dst: &Path) -> Result<(), SwapError> {
    let parent = dst.parent().ok_or_else(|| SwapError::Io {
        context: format!("Target path has no parent: {}", dst.display()),
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create target parent: {}", parent.display()))
}

/// Rename `src` to `dst`, copying when the two live on different filesystems.
fn move_dir(src: &Path, dst: &Path) -> Result<(), SwapError> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device_os_error(&err) => {
            tracing::debug!(
                from = %src.display(),
                to = %dst.display(),
                "rename crosses filesystems, copying"
            );
            fs::create_dir_all(dst)
                .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
            copy_tree(src, dst)?;
            fs::remove_dir_all(src)
                .with_context(|| format!("Failed to remove moved source: {}", src.display()))
        }
        Err(err) => Err(err).with_context(|| {
            format!("Failed to move {} to {}", src.display(), dst.display())
        }),
    }
}

fn replace_dst_with_tmp(dst: &Path, tmp: &Path) -> Result<(), SwapError> {
    if fs::symlink_metadata(dst).is_ok() {
        remove_path(dst).with_context(|| {
            format!("Failed to remove existing target: {}", dst.display())
        })?;
    }

    fs::rename(tmp, dst).with_context(|| {
        format!(
            "Failed to move temp path {} into target {}",
            tmp.display(),
            dst.display()
        )
    })
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn unique_temp_path(dst: &Path) -> Result<PathBuf, SwapError> {
    let invalid = |what: &str| SwapError::Io {
        context: format!("Target path has no {what}: {}", dst.display()),
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    };
    let parent = dst.parent().ok_or_else(|| invalid("parent"))?;
    let base = dst.file_name().ok_or_else(|| invalid("file name"))?;

    for attempt in 0u32..1000 {
        let name = if attempt == 0 {
            format!(".{}.deploy.{}", base.to_string_lossy(), std::process::id())
        } else {
            format!(
                ".{}.deploy.{}.{}",
                base.to_string_lossy(),
                std::process::id(),
                attempt
            )
        };
        let candidate = parent.join(name);
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }

    Err(SwapError::Io {
        context: format!("Failed to allocate a temp path next to {}", dst.display()),
        source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
    })
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), SwapError> {
    for entry in fs::read_dir(src).with_context(|| format!("Failed to read dir: {}", src.display()))? {
        let entry = entry.with_context(|| format!("Failed to read dir entry: {}", src.display()))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat dir entry: {}", from.display()))?;

        if ty.is_dir() {
            fs::create_dir_all(&to)
                .with_context(|| format!("Failed to create directory: {}", to.display()))?;
            copy_tree(&from, &to)?;
        } else if ty.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to).with_context(|| {
                format!("Failed to copy file from {} to {}", from.display(), to.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), SwapError> {
    let link = fs::read_link(from)
        .with_context(|| format!("Failed to read symlink: {}", from.display()))?;
    std::os::unix::fs::symlink(&link, to)
        .with_context(|| format!("Failed to create symlink: {}", to.display()))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), SwapError> {
    fs::copy(from, to)
        .map(|_| ())
        .with_context(|| format!("Failed to copy file from {} to {}", from.display(), to.display()))
}

fn is_cross_device_os_error(err: &std::io::Error) -> bool {
    let Some(code) = err.raw_os_error() else {
        return false;
    };

    #[cfg(unix)]
    {
        const EXDEV: i32 = 18;
        code == EXDEV
    }

    #[cfg(windows)]
    {
        const ERROR_NOT_SAME_DEVICE: i32 = 17;
        code == ERROR_NOT_SAME_DEVICE
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_device_error_is_detected() {
        #[cfg(unix)]
        {
            let exdev = std::io::Error::from_raw_os_error(18);
            assert!(is_cross_device_os_error(&exdev));
        }
        let other = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(!is_cross_device_os_error(&other));
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/c.txt"), "deep").unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();
        fs::create_dir_all(&dst).unwrap();

        copy_tree(&src, &dst).expect("copy should succeed");

        assert_eq!(fs::read_to_string(dst.join("a/b/c.txt")).unwrap(), "deep");
        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
    }

    #[test]
    fn replace_dst_overwrites_existing_file() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let dst = tmp.path().join("site");
        let staged = tmp.path().join("staged");
        fs::write(&dst, "a file where a directory should be").unwrap();
        fs::create_dir(&staged).unwrap();
        fs::write(staged.join("index.html"), "new").unwrap();

        replace_dst_with_tmp(&dst, &staged).expect("replace should succeed");

        assert!(dst.is_dir());
        assert!(!staged.exists());
        assert_eq!(fs::read_to_string(dst.join("index.html")).unwrap(), "new");
    }

    #[test]
    fn unique_temp_path_is_hidden_sibling() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let dst = tmp.path().join("site");
        let candidate = unique_temp_path(&dst).unwrap();

        assert_eq!(candidate.parent(), Some(tmp.path()));
        let name = candidate.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".site.deploy."));
    }
}
