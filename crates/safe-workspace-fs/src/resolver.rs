//! Path confinement: resolve an untrusted relative path against a workspace root.
//!
//! Resolution walks the requested path one component at a time, starting at
//! the freshly canonicalized root. Every component that exists as a symlink is
//! replaced by its target (absolute or relative) before the walk continues, and
//! `..` pops from the already-resolved prefix. Components that do not exist yet
//! are appended as-is; they cannot be symlinks, so lexical handling is exact
//! for them. Only the fully resolved result is compared against the root.

use crate::error::{Result, SafeFsError};
use std::{
    collections::VecDeque,
    ffi::OsString,
    fmt,
    path::{Component, Path, PathBuf},
};

/// Upper bound on symlink expansions during a single resolution (Linux `MAXSYMLINKS`).
pub const MAX_SYMLINK_HOPS: usize = 40;

/// An absolute, canonical path that equals or descends from the workspace root.
///
/// Only [`resolve`] constructs this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    path: PathBuf,
    root: PathBuf,
}

impl ResolvedPath {
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    /// Canonical root this path was confined to at resolution time.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path == self.root
    }

    /// POSIX-style path relative to the root; empty for the root itself.
    #[must_use]
    pub fn relative(&self) -> String {
        self.path
            .strip_prefix(&self.root)
            .map(posix_string)
            .unwrap_or_default()
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relative = self.relative();
        if relative.is_empty() {
            f.write_str(".")
        } else {
            f.write_str(&relative)
        }
    }
}

#[derive(Debug)]
enum Step {
    Parent,
    Name(OsString),
}

/// Rejects requested paths that are malformed before they touch the filesystem.
pub fn validate_requested_path(requested: &str) -> Result<()> {
    if requested.contains('\0') {
        return Err(SafeFsError::InvalidPath {
            path: requested.replace('\0', "\\0"),
            reason: "path contains null bytes".to_string(),
        });
    }
    Ok(())
}

/// Resolves `requested` against `root`, following every symlink, and fails with
/// [`SafeFsError::PathTraversal`] unless the result equals or descends from the root.
///
/// An empty path resolves to the root. A leading separator does not make the
/// path host-absolute: `/etc/passwd` means `<root>/etc/passwd`.
///
/// # Errors
/// - `InvalidPath` for NUL bytes or symlink loops
/// - `Configuration` if the root itself can no longer be canonicalized
/// - `PathTraversal` if the resolved target lies outside the root
pub fn resolve(root: &Path, requested: &str) -> Result<ResolvedPath> {
    validate_requested_path(requested)?;

    let canonical_root = root
        .canonicalize()
        .map_err(|e| SafeFsError::Configuration {
            message: format!("workspace root is no longer resolvable: {e}"),
        })?;

    let mut pending: VecDeque<Step> = steps_of(Path::new(requested)).into();
    let mut current = canonical_root.clone();
    let mut hops = 0usize;

    while let Some(step) = pending.pop_front() {
        match step {
            Step::Parent => {
                current.pop();
            }
            Step::Name(name) => {
                let candidate = current.join(&name);
                let is_symlink = std::fs::symlink_metadata(&candidate)
                    .is_ok_and(|meta| meta.file_type().is_symlink());
                if !is_symlink {
                    current = candidate;
                    continue;
                }

                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(SafeFsError::InvalidPath {
                        path: requested.to_string(),
                        reason: "too many levels of symbolic links".to_string(),
                    });
                }

                let target = std::fs::read_link(&candidate)
                    .map_err(|e| SafeFsError::io(requested, e))?;
                if target.has_root() {
                    current = anchor_of(&target);
                }
                for step in steps_of(&target).into_iter().rev() {
                    pending.push_front(step);
                }
            }
        }
    }

    if !current.starts_with(&canonical_root) {
        tracing::debug!(
            requested,
            resolved = %current.display(),
            "Rejected path escaping workspace root"
        );
        return Err(SafeFsError::PathTraversal {
            requested: requested.to_string(),
            resolved: current,
        });
    }

    let resolved = ResolvedPath {
        path: current,
        root: canonical_root,
    };
    tracing::trace!("Path resolved: '{}' -> '{}'", requested, resolved);
    Ok(resolved)
}

/// Returns `true` if `path` equals or descends from `root`, both taken as given.
#[must_use]
pub fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

/// Joins two POSIX-style relative paths, treating an empty base as the root.
#[must_use]
pub fn join_relative(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

fn steps_of(path: &Path) -> Vec<Step> {
    path.components()
        .filter_map(|component| match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => None,
            Component::ParentDir => Some(Step::Parent),
            Component::Normal(name) => Some(Step::Name(name.to_os_string())),
        })
        .collect()
}

/// Prefix and root components of an absolute symlink target.
fn anchor_of(target: &Path) -> PathBuf {
    target
        .components()
        .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect()
}

fn posix_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requested_path() {
        assert!(validate_requested_path("file.txt").is_ok());
        assert!(validate_requested_path("subdir/file.txt").is_ok());
        assert!(validate_requested_path("file\0.txt").is_err());
    }

    #[test]
    fn test_empty_path_is_root() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let resolved = resolve(temp_dir.path(), "")?;
        assert!(resolved.is_root());
        assert_eq!(resolved.relative(), "");
        assert_eq!(resolved.to_string(), ".");
        Ok(())
    }

    #[test]
    fn test_leading_separator_stays_relative() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let resolved = resolve(temp_dir.path(), "/etc/passwd")?;
        assert_eq!(resolved.relative(), "etc/passwd");
        assert!(resolved.as_path().starts_with(temp_dir.path().canonicalize()?));
        Ok(())
    }

    #[test]
    fn test_parent_traversal_rejected() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let err = resolve(temp_dir.path(), "a/../../outside.txt").unwrap_err();
        assert!(matches!(err, SafeFsError::PathTraversal { .. }));
        Ok(())
    }

    #[test]
    fn test_nonexistent_tail_with_dotdot() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let resolved = resolve(temp_dir.path(), "x/y/../z/file.txt")?;
        assert_eq!(resolved.relative(), "x/z/file.txt");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_invalid() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        std::os::unix::fs::symlink("b", temp_dir.path().join("a"))?;
        std::os::unix::fs::symlink("a", temp_dir.path().join("b"))?;
        let err = resolve(temp_dir.path(), "a/file").unwrap_err();
        assert!(matches!(err, SafeFsError::InvalidPath { .. }));
        Ok(())
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("", "a"), "a");
        assert_eq!(join_relative("a/b", "c"), "a/b/c");
        assert_eq!(join_relative("a/", "c"), "a/c");
    }
}
