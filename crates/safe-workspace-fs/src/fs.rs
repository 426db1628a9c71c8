//! Confined filesystem façade.
//!
//! Every call resolves its path through [`resolve`](crate::resolver::resolve),
//! then consults the instance's [`PathSafetyPolicy`], then performs or previews
//! the operation.

use crate::{
    config::{DEFAULT_TMP_DIR, SandboxConfig},
    error::{Result, SafeFsError},
    policy::{Gate, Operation, Outcome, PathSafetyPolicy, Plan},
    resolver::{ResolvedPath, join_relative, resolve},
    tmp::SafeTmp,
};

use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Component, Path, PathBuf},
};

/// Kind of a directory entry, taken without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    #[must_use]
    pub fn from_file_type(file_type: fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// A single entry returned by [`SafeFs::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name; non-UTF-8 bytes are replaced with `U+FFFD`.
    pub name: String,
    pub kind: EntryKind,
    /// Set when `name` had to be converted lossily, so it cannot be passed back
    /// to another [`SafeFs`] call.
    #[serde(default)]
    pub lossy_name: bool,
}

/// Filesystem façade confined to a workspace root.
#[derive(Clone, Debug)]
pub struct SafeFs {
    root: PathBuf,
    policy: PathSafetyPolicy,
    tmp_dir: String,
}

impl SafeFs {
    /// Create a new builder for configuring the façade.
    #[must_use]
    pub fn builder() -> SafeFsBuilder {
        SafeFsBuilder::new()
    }

    /// Façade over `root` with the default (read-write, immediate) policy.
    ///
    /// # Errors
    /// Returns an error if `root` is missing or not a directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().root(root).build()
    }

    /// # Errors
    /// Returns an error if the configured root is missing or not a directory,
    /// or if `tmp_dir` is not a plain relative path.
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        Self::builder()
            .root(&config.root)
            .readonly(config.readonly)
            .dry_run(config.dry_run)
            .tmp_dir(&config.tmp_dir)
            .build()
    }

    /// Canonical workspace root as seen at construction.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn policy(&self) -> PathSafetyPolicy {
        self.policy
    }

    /// Reserved subpath for temporary directories.
    #[must_use]
    pub fn tmp_dir(&self) -> &str {
        &self.tmp_dir
    }

    /// Temporary-directory manager sharing this façade's root and policy.
    #[must_use]
    pub fn tmp(&self) -> SafeTmp {
        SafeTmp::new(self.clone())
    }

    /// Resolve a relative path against the workspace root.
    ///
    /// # Errors
    /// Returns `PathTraversal` if the path escapes the root, `InvalidPath` for
    /// malformed input.
    pub fn resolve<P: AsRef<str>>(&self, path: P) -> Result<ResolvedPath> {
        resolve(&self.root, path.as_ref())
    }

    /// Open a file for writing, creating missing parent directories.
    ///
    /// Under `dry_run` nothing is created; the returned plan lists the target
    /// in `would_delete` when the write would overwrite an existing file.
    ///
    /// # Errors
    /// - `PathTraversal` / `InvalidPath` if the path is rejected
    /// - `PathPolicy` under a readonly policy
    /// - `Io` if directories or the file cannot be created
    pub fn open_write<P: AsRef<str>>(&self, path: P) -> Result<Outcome<File>> {
        let resolved = self.resolve(path)?;
        let relative = resolved.relative();

        if self.policy.check(Operation::Write, &relative)? == Gate::Preview {
            let would_delete = if resolved.as_path().is_file() {
                vec![relative.clone()]
            } else {
                Vec::new()
            };
            tracing::debug!(path = %relative, overwrite = !would_delete.is_empty(), "Planned write");
            return Ok(Outcome::Planned(Plan::new(
                Operation::Write,
                relative,
                would_delete,
            )));
        }

        if let Some(parent) = resolved.as_path().parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| SafeFsError::io(relative.clone(), e))?;
        }

        let file = File::create(resolved.as_path()).map_err(|e| SafeFsError::io(relative.clone(), e))?;
        tracing::debug!("Opened for write: {}", relative);
        Ok(Outcome::Executed(file))
    }

    /// Sandboxed version of `std::fs::write`.
    ///
    /// # Errors
    /// Same as [`SafeFs::open_write`], plus `Io` if writing fails.
    pub fn write<P: AsRef<str>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> Result<Outcome<()>> {
        let path = path.as_ref();
        match self.open_write(path)? {
            Outcome::Executed(mut file) => {
                file.write_all(contents.as_ref())
                    .and_then(|()| file.flush())
                    .map_err(|e| SafeFsError::io(path, e))?;
                Ok(Outcome::Executed(()))
            }
            Outcome::Planned(plan) => Ok(Outcome::Planned(plan)),
        }
    }

    /// Open a regular file for reading. Unaffected by policy.
    ///
    /// # Errors
    /// - `PathTraversal` / `InvalidPath` if the path is rejected
    /// - `NotFound` if the target is missing or not a regular file
    pub fn open_read<P: AsRef<str>>(&self, path: P) -> Result<File> {
        let resolved = self.resolve(path)?;
        let relative = resolved.relative();
        self.policy.check(Operation::Read, &relative)?;

        let is_file = fs::metadata(resolved.as_path()).is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(SafeFsError::NotFound { path: relative });
        }

        File::open(resolved.as_path()).map_err(|e| SafeFsError::from_io(relative, e))
    }

    /// Sandboxed version of `std::fs::read`.
    ///
    /// # Errors
    /// Same as [`SafeFs::open_read`], plus `Io` if reading fails.
    pub fn read<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        use std::io::Read;

        let path = path.as_ref();
        let mut file = self.open_read(path)?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| SafeFsError::io(path, e))?;
        Ok(content)
    }

    /// Sandboxed version of `std::fs::read_to_string`.
    ///
    /// # Errors
    /// Same as [`SafeFs::read`], plus `Io` if the content is not UTF-8.
    pub fn read_to_string<P: AsRef<str>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            SafeFsError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Sandboxed version of `Path::exists`.
    ///
    /// # Errors
    /// Returns an error if the path is rejected by resolution.
    pub fn exists<P: AsRef<str>>(&self, path: P) -> Result<bool> {
        let resolved = self.resolve(path)?;
        Ok(resolved.as_path().exists())
    }

    /// Sandboxed version of `std::fs::metadata`.
    ///
    /// # Errors
    /// Returns `NotFound` if the target is missing.
    pub fn metadata<P: AsRef<str>>(&self, path: P) -> Result<fs::Metadata> {
        let resolved = self.resolve(path)?;
        fs::metadata(resolved.as_path()).map_err(|e| SafeFsError::from_io(resolved.relative(), e))
    }

    /// List a directory, sorted by entry name.
    ///
    /// # Errors
    /// - `PathTraversal` / `InvalidPath` if the path is rejected
    /// - `NotFound` if the target is missing or not a directory
    pub fn list_dir<P: AsRef<str>>(&self, path: P) -> Result<Vec<DirEntry>> {
        let resolved = self.resolve(path)?;
        let relative = resolved.relative();
        self.policy.check(Operation::List, &relative)?;

        if !resolved.as_path().is_dir() {
            return Err(SafeFsError::NotFound { path: relative });
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(resolved.as_path()).map_err(|e| SafeFsError::from_io(relative.clone(), e))? {
            let entry = entry.map_err(|e| SafeFsError::io(relative.clone(), e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| SafeFsError::io(relative.clone(), e))?;
            let file_name = entry.file_name();
            let (name, lossy_name) = match file_name.to_str() {
                Some(name) => (name.to_string(), false),
                None => (file_name.to_string_lossy().into_owned(), true),
            };
            entries.push(DirEntry {
                name,
                kind: EntryKind::from_file_type(file_type),
                lossy_name,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Sandboxed version of `std::fs::create_dir_all`. Idempotent.
    ///
    /// Not destructive, so it runs under `dry_run` as well.
    ///
    /// # Errors
    /// - `PathTraversal` / `InvalidPath` if the path is rejected
    /// - `PathPolicy` under a readonly policy
    /// - `Conflict` if a non-directory already occupies the path
    pub fn mkdir_p<P: AsRef<str>>(&self, path: P) -> Result<ResolvedPath> {
        let resolved = self.resolve(path)?;
        let relative = resolved.relative();
        self.policy.check(Operation::Mkdir, &relative)?;

        match fs::metadata(resolved.as_path()) {
            Ok(meta) if meta.is_dir() => return Ok(resolved),
            Ok(_) => return Err(SafeFsError::Conflict { path: relative }),
            Err(_) => {}
        }

        fs::create_dir_all(resolved.as_path()).map_err(|e| SafeFsError::io(relative.clone(), e))?;
        tracing::debug!("Created directory: {}", relative);
        Ok(resolved)
    }

    /// Recursively remove a path and everything beneath it.
    ///
    /// Symlinks inside the tree are unlinked, never followed. Removing the
    /// workspace root empties it but keeps the root directory.
    ///
    /// Under `dry_run` the returned plan lists every path that would be
    /// removed, in pre-order, relative to the root.
    ///
    /// # Errors
    /// - `PathTraversal` / `InvalidPath` if the path is rejected
    /// - `PathPolicy` under a readonly policy
    /// - `NotFound` if the target does not exist
    /// - `Io` if removal fails
    pub fn rm_tree<P: AsRef<str>>(&self, path: P) -> Result<Outcome<()>> {
        let resolved = self.resolve(path)?;
        let relative = resolved.relative();
        let gate = self.policy.check(Operation::Remove, &relative)?;

        let meta = fs::symlink_metadata(resolved.as_path())
            .map_err(|e| SafeFsError::from_io(relative.clone(), e))?;

        if gate == Gate::Preview {
            let would_delete = if meta.is_dir() {
                let mut out = Vec::new();
                collect_preorder(resolved.as_path(), &relative, &mut out)?;
                out
            } else {
                vec![relative.clone()]
            };
            tracing::debug!(path = %relative, entries = would_delete.len(), "Planned removal");
            return Ok(Outcome::Planned(Plan::new(
                Operation::Remove,
                relative,
                would_delete,
            )));
        }

        remove_resolved(&resolved, meta.is_dir())?;
        tracing::debug!("Removed tree: {}", relative);
        Ok(Outcome::Executed(()))
    }
}

/// Deletes a resolved path without re-checking policy.
pub(crate) fn remove_resolved(resolved: &ResolvedPath, is_dir: bool) -> Result<()> {
    let relative = resolved.relative();
    if resolved.is_root() {
        for entry in fs::read_dir(resolved.as_path()).map_err(|e| SafeFsError::io(relative.clone(), e))? {
            let entry = entry.map_err(|e| SafeFsError::io(relative.clone(), e))?;
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            let child = entry.path();
            let result = if is_dir {
                fs::remove_dir_all(&child)
            } else {
                fs::remove_file(&child)
            };
            result.map_err(|e| SafeFsError::io(entry.file_name().to_string_lossy(), e))?;
        }
        return Ok(());
    }

    let result = if is_dir {
        fs::remove_dir_all(resolved.as_path())
    } else {
        fs::remove_file(resolved.as_path())
    };
    result.map_err(|e| SafeFsError::from_io(relative, e))
}

/// Pre-order walk of `dir` (siblings sorted by name), without following symlinks.
///
/// Descends through the raw file names; only the reported paths are lossy.
fn collect_preorder(dir: &Path, relative: &str, out: &mut Vec<String>) -> Result<()> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SafeFsError::io(relative, e))? {
        let entry = entry.map_err(|e| SafeFsError::io(relative, e))?;
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        let raw_name = entry.file_name();
        children.push((raw_name.to_string_lossy().into_owned(), raw_name, is_dir));
    }
    children.sort();

    for (name, raw_name, is_dir) in children {
        let child_relative = join_relative(relative, &name);
        out.push(child_relative.clone());
        if is_dir {
            collect_preorder(&dir.join(&raw_name), &child_relative, out)?;
        }
    }
    Ok(())
}

/// Builder for configuring a [`SafeFs`].
pub struct SafeFsBuilder {
    root: Option<PathBuf>,
    policy: PathSafetyPolicy,
    tmp_dir: String,
}

impl SafeFsBuilder {
    fn new() -> Self {
        Self {
            root: None,
            policy: PathSafetyPolicy::default(),
            tmp_dir: DEFAULT_TMP_DIR.to_string(),
        }
    }

    /// Set the workspace root. It must already exist.
    #[must_use]
    pub fn root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.root = Some(path.into());
        self
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn policy(mut self, policy: PathSafetyPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.policy = PathSafetyPolicy::new(readonly, self.policy.is_dry_run());
        self
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.policy = PathSafetyPolicy::new(self.policy.is_readonly(), dry_run);
        self
    }

    /// Set the reserved subpath for temporary directories (default `.tmp`).
    #[must_use]
    pub fn tmp_dir<S: Into<String>>(mut self, tmp_dir: S) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    /// Build the `SafeFs`.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The root is not set, or is not a directory (`Configuration`)
    /// - The root does not exist (`NotFound`)
    /// - `tmp_dir` is empty or not made of plain path components (`Configuration`)
    pub fn build(self) -> Result<SafeFs> {
        let root = self.root.ok_or_else(|| SafeFsError::Configuration {
            message: "workspace root is required".to_string(),
        })?;

        let root = root
            .canonicalize()
            .map_err(|e| SafeFsError::from_io(root.display().to_string(), e))?;
        if !root.is_dir() {
            return Err(SafeFsError::Configuration {
                message: format!("workspace root is not a directory: {}", root.display()),
            });
        }

        let tmp_dir_valid = !self.tmp_dir.is_empty()
            && Path::new(&self.tmp_dir)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !tmp_dir_valid {
            return Err(SafeFsError::Configuration {
                message: format!("invalid tmp_dir {:?}: must be a plain relative path", self.tmp_dir),
            });
        }

        let safe_fs = SafeFs {
            root,
            policy: self.policy,
            tmp_dir: self.tmp_dir,
        };

        tracing::info!(
            "SafeFs initialized - root: {:?}, readonly: {}, dry_run: {}",
            safe_fs.root,
            safe_fs.policy.is_readonly(),
            safe_fs.policy.is_dry_run()
        );

        Ok(safe_fs)
    }
}
