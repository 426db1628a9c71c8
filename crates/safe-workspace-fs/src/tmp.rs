//! Ephemeral per-job directories under the workspace's reserved tmp subpath.
//!
//! Directories are never created under host-shared temporary storage. Each one
//! belongs to the caller that created it until [`SafeTmp::cleanup`] runs; use
//! [`SafeTmp::scoped`] or [`SafeTmp::with_tempdir`] to tie cleanup to scope exit.

use crate::{
    error::{Result, SafeFsError},
    fs::SafeFs,
    policy::Operation,
    resolver::{ResolvedPath, is_within, join_relative},
    security::set_owner_only_permissions,
};

use std::{
    fs,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
};
use uuid::Uuid;

/// A directory created by [`SafeTmp::make`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempDirectory {
    path: ResolvedPath,
}

impl TempDirectory {
    /// Absolute path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Path relative to the workspace root, usable with [`SafeFs`] operations.
    #[must_use]
    pub fn relative(&self) -> String {
        self.path.relative()
    }

    /// `{prefix}-{suffix}` directory name.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .as_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// What [`SafeTmp::cleanup`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStatus {
    Removed,
    /// Nothing to delete
    Absent,
    /// The path is not strictly inside the tmp root; nothing was touched
    Refused,
}

/// Lifecycle manager for temporary directories.
#[derive(Clone, Debug)]
pub struct SafeTmp {
    fs: SafeFs,
}

impl SafeTmp {
    #[must_use]
    pub const fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    /// Resolve the tmp root fresh.
    ///
    /// # Errors
    /// Returns `PathTraversal` if the reserved subpath escapes the workspace.
    pub fn tmp_root(&self) -> Result<ResolvedPath> {
        self.fs.resolve(self.fs.tmp_dir())
    }

    /// Create `{tmp_root}/{prefix}-{random suffix}` with owner-only permissions.
    ///
    /// # Errors
    /// - `InvalidPath` if `prefix` is empty or not a single plain component
    /// - `PathPolicy` under a readonly policy
    /// - `Conflict` if the generated name already exists
    pub fn make(&self, prefix: &str) -> Result<TempDirectory> {
        validate_prefix(prefix)?;

        let tmp_root = self.fs.mkdir_p(self.fs.tmp_dir())?;
        let relative = join_relative(&tmp_root.relative(), &format!("{prefix}-{}", Uuid::new_v4().simple()));
        let resolved = self.fs.resolve(&relative)?;

        fs::create_dir(resolved.as_path()).map_err(|e| {
            if e.kind() == IoErrorKind::AlreadyExists {
                SafeFsError::Conflict {
                    path: relative.clone(),
                }
            } else {
                SafeFsError::io(relative.clone(), e)
            }
        })?;
        set_owner_only_permissions(resolved.as_path(), &relative)?;

        tracing::debug!("Created temp directory: {}", relative);
        Ok(TempDirectory { path: resolved })
    }

    /// Recursively delete a directory created by [`SafeTmp::make`].
    ///
    /// Relative paths are taken relative to the workspace root. The tmp root
    /// is re-resolved on every call, and only strict descendants of it are
    /// deleted. The final component is not followed: a symlink is unlinked.
    ///
    /// # Errors
    /// - `PathPolicy` under a readonly policy
    /// - `Io` if deletion fails
    pub fn cleanup(&self, path: impl AsRef<Path>) -> Result<CleanupStatus> {
        let path = path.as_ref();
        let tmp_root = self.tmp_root()?;
        self.fs.policy().check(Operation::Cleanup, &tmp_root.relative())?;

        let path: PathBuf = if path.is_relative() {
            self.fs.root().join(path)
        } else {
            path.to_path_buf()
        };

        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            tracing::warn!("Refused temp cleanup of path without a final component");
            return Ok(CleanupStatus::Refused);
        };

        let Ok(parent) = parent.canonicalize() else {
            return Ok(CleanupStatus::Absent);
        };
        let candidate = parent.join(name);

        if candidate == tmp_root.as_path() || !is_within(tmp_root.as_path(), &candidate) {
            tracing::warn!(
                tmp_root = %tmp_root,
                "Refused temp cleanup of a path outside the tmp root"
            );
            return Ok(CleanupStatus::Refused);
        }

        let relative = candidate
            .strip_prefix(tmp_root.root())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let meta = match fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(CleanupStatus::Absent),
            Err(e) => return Err(SafeFsError::io(relative, e)),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(&candidate)
        } else {
            fs::remove_file(&candidate)
        };
        match result {
            Ok(()) => {
                tracing::debug!("Removed temp directory: {}", relative);
                Ok(CleanupStatus::Removed)
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(CleanupStatus::Absent),
            Err(e) => Err(SafeFsError::io(relative, e)),
        }
    }

    /// Create a temp directory that is cleaned up when the guard is dropped.
    ///
    /// # Errors
    /// Same as [`SafeTmp::make`].
    pub fn scoped(&self, prefix: &str) -> Result<TempDirGuard> {
        let dir = self.make(prefix)?;
        Ok(TempDirGuard {
            tmp: self.clone(),
            dir,
            armed: true,
        })
    }

    /// Run `f` with a fresh temp directory, cleaning it up afterwards whether
    /// `f` succeeds or fails.
    ///
    /// A cleanup failure is reported only if `f` itself succeeded.
    ///
    /// # Errors
    /// Returns the error from `make`, from `f`, or from cleanup.
    pub fn with_tempdir<T, E, F>(&self, prefix: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&TempDirectory) -> std::result::Result<T, E>,
        E: From<SafeFsError>,
    {
        let guard = self.scoped(prefix)?;
        let result = f(guard.dir());
        let cleanup = guard.close();
        match (result, cleanup) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _) => Err(e),
        }
    }
}

/// Owns a temp directory and removes it on drop.
#[derive(Debug)]
pub struct TempDirGuard {
    tmp: SafeTmp,
    dir: TempDirectory,
    armed: bool,
}

impl TempDirGuard {
    #[must_use]
    pub const fn dir(&self) -> &TempDirectory {
        &self.dir
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Disarm the guard and hand the directory back to the caller.
    #[must_use]
    pub fn keep(mut self) -> TempDirectory {
        self.armed = false;
        self.dir.clone()
    }

    /// Clean up now and report the result.
    ///
    /// # Errors
    /// Same as [`SafeTmp::cleanup`].
    pub fn close(mut self) -> Result<CleanupStatus> {
        self.armed = false;
        self.tmp.cleanup(self.dir.path())
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.tmp.cleanup(self.dir.path()) {
            tracing::warn!("Failed to clean up temp directory {}: {}", self.dir.relative(), e);
        }
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    let plain = !prefix.is_empty()
        && prefix != "."
        && prefix != ".."
        && !prefix.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(SafeFsError::InvalidPath {
            path: prefix.replace('\0', "\\0"),
            reason: "temp prefix must be a single plain path component".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PathSafetyPolicy;
    use std::collections::HashSet;

    fn tmp_for(root: &Path) -> std::result::Result<SafeTmp, SafeFsError> {
        Ok(SafeFs::new(root)?.tmp())
    }

    #[test]
    fn test_make_names_and_location() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;

        let dir = tmp.make("job")?;
        assert!(dir.path().is_dir());
        assert!(dir.name().starts_with("job-"));
        assert!(dir.relative().starts_with(".tmp/job-"));

        let tmp_root = tmp.tmp_root()?;
        assert!(dir.path().starts_with(tmp_root.as_path()));
        assert_ne!(dir.path(), tmp_root.as_path());
        Ok(())
    }

    #[test]
    fn test_make_is_unique() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;

        let mut seen = HashSet::new();
        for _ in 0..64 {
            let dir = tmp.make("job")?;
            assert!(seen.insert(dir.path().to_path_buf()));
        }
        Ok(())
    }

    #[test]
    fn test_invalid_prefixes() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;
        for prefix in ["", ".", "..", "a/b", "../up"] {
            assert!(
                matches!(tmp.make(prefix), Err(SafeFsError::InvalidPath { .. })),
                "prefix {prefix:?} should be rejected"
            );
        }
        Ok(())
    }

    #[test]
    fn test_make_blocked_when_readonly() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let tmp = SafeFs::builder()
            .root(temp_dir.path())
            .policy(PathSafetyPolicy::readonly())
            .build()?
            .tmp();
        assert!(matches!(tmp.make("job"), Err(SafeFsError::PathPolicy { .. })));
        assert!(!temp_dir.path().join(".tmp").exists());
        Ok(())
    }

    #[test]
    fn test_cleanup_removes_and_is_idempotent() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;

        let dir = tmp.make("job")?;
        std::fs::write(dir.path().join("scratch.bin"), b"data")?;

        assert_eq!(tmp.cleanup(dir.path())?, CleanupStatus::Removed);
        assert!(!dir.path().exists());
        assert_eq!(tmp.cleanup(dir.path())?, CleanupStatus::Absent);
        Ok(())
    }

    #[test]
    fn test_cleanup_accepts_relative_path() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;

        let dir = tmp.make("job")?;
        assert_eq!(tmp.cleanup(dir.relative())?, CleanupStatus::Removed);
        Ok(())
    }

    #[test]
    fn test_cleanup_refuses_outside_tmp_root() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;
        let _ = tmp.make("job")?;

        let precious = temp_dir.path().join("precious");
        std::fs::create_dir(&precious)?;
        std::fs::write(precious.join("keep.txt"), "keep")?;

        assert_eq!(tmp.cleanup(&precious)?, CleanupStatus::Refused);
        assert_eq!(tmp.cleanup(tmp.tmp_root()?.as_path())?, CleanupStatus::Refused);
        assert_eq!(
            tmp.cleanup(temp_dir.path().join(".tmp/../precious"))?,
            CleanupStatus::Refused
        );
        assert!(precious.join("keep.txt").is_file());
        assert!(temp_dir.path().join(".tmp").is_dir());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_unlinks_symlink_without_following()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("ws");
        let outside = temp_dir.path().join("outside");
        std::fs::create_dir(&root)?;
        std::fs::create_dir(&outside)?;
        std::fs::write(outside.join("keep.txt"), "keep")?;

        let tmp = tmp_for(&root)?;
        let tmp_root = tmp.tmp_root()?;
        let _ = tmp.make("job")?;
        let link = tmp_root.as_path().join("job-link");
        std::os::unix::fs::symlink(&outside, &link)?;

        assert_eq!(tmp.cleanup(&link)?, CleanupStatus::Removed);
        assert!(std::fs::symlink_metadata(&link).is_err());
        assert_eq!(std::fs::read_to_string(outside.join("keep.txt"))?, "keep");
        Ok(())
    }

    #[test]
    fn test_guard_cleans_up_on_drop() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;

        let path = {
            let guard = tmp.scoped("job")?;
            std::fs::write(guard.path().join("f"), "x")?;
            guard.path().to_path_buf()
        };
        assert!(!path.exists());

        let kept = tmp.scoped("job")?.keep();
        assert!(kept.path().is_dir());
        Ok(())
    }

    #[test]
    fn test_with_tempdir_cleans_up_on_error() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let tmp = tmp_for(temp_dir.path())?;

        let mut seen = None;
        let result: std::result::Result<(), SafeFsError> = tmp.with_tempdir("job", |dir| {
            seen = Some(dir.path().to_path_buf());
            Err(SafeFsError::NotFound {
                path: "input".to_string(),
            })
        });
        assert!(matches!(result, Err(SafeFsError::NotFound { .. })));
        let seen = seen.ok_or("closure should have run")?;
        assert!(!seen.exists());

        let value = tmp.with_tempdir("job", |dir| -> std::result::Result<_, SafeFsError> {
            Ok(dir.name())
        })?;
        assert!(value.starts_with("job-"));
        Ok(())
    }
}
