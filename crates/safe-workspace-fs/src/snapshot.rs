//! Gzip-tar snapshots of a confined subtree.
//!
//! The source is walked through the same [`SafeFs`] used for every other
//! operation, so archive contents obey the same confinement. Output is
//! deterministic: members are emitted in pre-order with siblings sorted by
//! name, stored relative to the source, with zeroed timestamps and ownership.

use crate::{
    error::{Result, SafeFsError},
    fs::{EntryKind, SafeFs, remove_resolved},
    observer::{SkipNotice, SkipObserver, SkipReason, TracingSkipObserver, notify},
    policy::{Gate, Operation, Outcome, Plan},
    resolver::{ResolvedPath, join_relative},
};

use flate2::{Compression, GzBuilder};
use std::{fs::File, io::Write, sync::Arc};
use tar::{EntryType, Header};
use uuid::Uuid;

/// Mode bits stored for directory members.
const DIR_MODE: u32 = 0o755;
/// Mode bits stored for regular files without any execute bit.
const FILE_MODE: u32 = 0o644;
/// Mode bits stored for regular files with any execute bit.
const EXEC_MODE: u32 = 0o755;

#[derive(Debug)]
enum Member {
    Directory {
        name: String,
    },
    File {
        workspace_path: String,
        name: String,
    },
}

/// Builds tar.gz snapshots, reporting skipped entries to an observer.
#[derive(Clone)]
pub struct SnapshotArchiver {
    observer: Arc<dyn SkipObserver>,
}

impl Default for SnapshotArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SnapshotArchiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotArchiver").finish_non_exhaustive()
    }
}

impl SnapshotArchiver {
    /// Archiver that logs skipped entries through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_observer(TracingSkipObserver)
    }

    #[must_use]
    pub fn with_observer(observer: impl SkipObserver + 'static) -> Self {
        Self {
            observer: Arc::new(observer),
        }
    }

    /// Archive `source` into a gzip-tar at `dest`, both relative to the workspace root.
    ///
    /// Entries whose name starts with `.` are excluded together with their
    /// subtree unless `include_hidden` is set. Symlinks, special files and
    /// entries with non-UTF-8 names are skipped and reported to the observer.
    ///
    /// The archive is written to a hidden sibling of `dest` and renamed into
    /// place once complete; on failure the sibling is removed and an existing
    /// `dest` is left as it was.
    ///
    /// # Errors
    /// - `PathTraversal` / `InvalidPath` if either path is rejected, or
    ///   `InvalidPath` if `dest` is the workspace root
    /// - `PathPolicy` under a readonly policy
    /// - `Conflict` if `dest` exists and `force` is not set
    /// - `NotFound` if `source` is missing or not a directory
    /// - `Io` if reading a member or writing the archive fails
    pub fn create(
        &self,
        fs: &SafeFs,
        source: &str,
        dest: &str,
        include_hidden: bool,
        force: bool,
    ) -> Result<Outcome<ResolvedPath>> {
        let source = fs.resolve(source)?;
        let dest = fs.resolve(dest)?;
        let dest_display = dest.relative();

        if dest.is_root() {
            return Err(SafeFsError::InvalidPath {
                path: dest_display,
                reason: "snapshot destination must name a file".to_string(),
            });
        }

        let gate = fs.policy().check(Operation::Snapshot, &dest_display)?;

        let dest_exists = std::fs::symlink_metadata(dest.as_path()).is_ok();
        if dest_exists && !force {
            return Err(SafeFsError::Conflict { path: dest_display });
        }

        let mut members = Vec::new();
        self.collect(fs, &source.relative(), "", &dest, include_hidden, &mut members)?;

        if gate == Gate::Preview {
            let would_delete = if dest_exists {
                vec![dest_display.clone()]
            } else {
                Vec::new()
            };
            tracing::debug!(path = %dest_display, members = members.len(), "Planned snapshot");
            return Ok(Outcome::Planned(Plan::new(
                Operation::Snapshot,
                dest_display,
                would_delete,
            )));
        }

        // Staged next to `dest`; a failed run leaves any previous archive in place.
        let staging_display = staging_name(&dest_display);
        let staging = fs.resolve(&staging_display)?;
        let file = match fs.open_write(&staging_display)? {
            Outcome::Executed(file) => file,
            Outcome::Planned(plan) => return Ok(Outcome::Planned(plan)),
        };

        let written = write_archive(fs, file, &members, &dest_display).and_then(|()| {
            std::fs::rename(staging.as_path(), dest.as_path())
                .map_err(|e| SafeFsError::io(dest_display.as_str(), e))
        });
        if let Err(e) = written {
            if let Err(cleanup) = remove_resolved(&staging, false) {
                tracing::warn!("Failed to remove partial snapshot {}: {}", staging_display, cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            "Snapshot created: {} -> {} ({} members)",
            source,
            dest_display,
            members.len()
        );
        Ok(Outcome::Executed(dest))
    }

    fn collect(
        &self,
        fs: &SafeFs,
        workspace_dir: &str,
        archive_dir: &str,
        dest: &ResolvedPath,
        include_hidden: bool,
        out: &mut Vec<Member>,
    ) -> Result<()> {
        for entry in fs.list_dir(workspace_dir)? {
            if !include_hidden && entry.name.starts_with('.') {
                continue;
            }

            let workspace_path = join_relative(workspace_dir, &entry.name);
            if entry.lossy_name {
                self.skip(workspace_path, SkipReason::NonUtf8Name);
                continue;
            }
            let name = join_relative(archive_dir, &entry.name);

            match entry.kind {
                EntryKind::Directory => {
                    out.push(Member::Directory { name: name.clone() });
                    self.collect(fs, &workspace_path, &name, dest, include_hidden, out)?;
                }
                EntryKind::File => {
                    if fs.resolve(&workspace_path)?.as_path() == dest.as_path() {
                        self.skip(workspace_path, SkipReason::ArchiveDestination);
                    } else {
                        out.push(Member::File {
                            workspace_path,
                            name,
                        });
                    }
                }
                EntryKind::Symlink => self.skip(workspace_path, SkipReason::Symlink),
                EntryKind::Other => self.skip(workspace_path, SkipReason::SpecialFile),
            }
        }
        Ok(())
    }

    fn skip(&self, entry: String, reason: SkipReason) {
        notify(self.observer.as_ref(), &SkipNotice { entry, reason });
    }
}

/// Archive `source` into `dest` with the default tracing observer.
///
/// # Errors
/// See [`SnapshotArchiver::create`].
pub fn create_snapshot_tar(
    fs: &SafeFs,
    source: &str,
    dest: &str,
    include_hidden: bool,
    force: bool,
) -> Result<Outcome<ResolvedPath>> {
    SnapshotArchiver::new().create(fs, source, dest, include_hidden, force)
}

/// Hidden sibling of `dest` used while the archive is being written.
fn staging_name(dest: &str) -> String {
    let (parent, name) = dest.rsplit_once('/').unwrap_or(("", dest));
    join_relative(parent, &format!(".{name}.partial-{}", Uuid::new_v4().simple()))
}

fn write_archive(fs: &SafeFs, file: File, members: &[Member], dest_display: &str) -> Result<()> {
    let io_err = |e: std::io::Error| SafeFsError::io(dest_display, e);

    let encoder = GzBuilder::new().mtime(0).write(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for member in members {
        match member {
            Member::Directory { name } => {
                let mut header = base_header(EntryType::Directory, DIR_MODE);
                header.set_size(0);
                builder
                    .append_data(&mut header, name, std::io::empty())
                    .map_err(io_err)?;
            }
            Member::File {
                workspace_path,
                name,
            } => {
                let source = fs.open_read(workspace_path)?;
                let meta = source
                    .metadata()
                    .map_err(|e| SafeFsError::io(workspace_path.as_str(), e))?;
                let mut header = base_header(EntryType::Regular, file_mode(&meta));
                header.set_size(meta.len());
                builder
                    .append_data(&mut header, name, source)
                    .map_err(io_err)?;
            }
        }
    }

    let encoder = builder.into_inner().map_err(io_err)?;
    let mut file = encoder.finish().map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(())
}

fn base_header(entry_type: EntryType, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn file_mode(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 != 0 {
            return EXEC_MODE;
        }
    }
    #[cfg(not(unix))]
    let _ = meta;

    FILE_MODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn member_names(archive: &std::path::Path) -> std::io::Result<Vec<String>> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive)?));
        let mut names = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            names.push(entry.path()?.to_string_lossy().into_owned());
        }
        Ok(names)
    }

    #[test]
    fn test_members_are_relative_and_ordered() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let safe_fs = SafeFs::new(temp_dir.path())?;
        let _ = safe_fs.write("src/b.txt", "b")?;
        let _ = safe_fs.write("src/a/inner.txt", "inner")?;

        let dest = create_snapshot_tar(&safe_fs, "src", "out/snap.tar.gz", false, false)?
            .into_executed()
            .ok_or("expected the snapshot to be written")?;
        assert_eq!(dest.relative(), "out/snap.tar.gz");

        let names = member_names(dest.as_path())?;
        assert_eq!(names, ["a", "a/inner.txt", "b.txt"]);
        Ok(())
    }

    #[test]
    fn test_staging_name_is_hidden_sibling() {
        let staged = staging_name("out/snap.tgz");
        assert!(staged.starts_with("out/.snap.tgz.partial-"));
        assert!(staging_name("snap.tgz").starts_with(".snap.tgz.partial-"));
        assert_ne!(staging_name("snap.tgz"), staging_name("snap.tgz"));
    }

    #[test]
    fn test_member_content_and_header() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let safe_fs = SafeFs::new(temp_dir.path())?;
        let _ = safe_fs.write("src/hello.txt", "hello")?;

        let dest = create_snapshot_tar(&safe_fs, "src", "snap.tgz", false, false)?
            .into_executed()
            .ok_or("expected the snapshot to be written")?;

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(dest.as_path())?));
        let mut entries = archive.entries()?;
        let mut entry = entries.next().ok_or("archive is empty")??;
        assert_eq!(entry.header().mtime()?, 0);
        assert_eq!(entry.header().uid()?, 0);
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        assert_eq!(content, "hello");
        Ok(())
    }

    #[test]
    fn test_existing_destination_inside_source_is_skipped()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let safe_fs = SafeFs::new(temp_dir.path())?;
        let _ = safe_fs.write("data.txt", "data")?;
        let _ = safe_fs.write("snap.tgz", "old archive")?;

        let skipped = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&skipped);
        let archiver = SnapshotArchiver::with_observer(move |notice: &SkipNotice| {
            if let Ok(mut guard) = sink.lock() {
                guard.push(notice.clone());
            }
        });
        let dest = archiver
            .create(&safe_fs, "", "snap.tgz", false, true)?
            .into_executed()
            .ok_or("expected the snapshot to be written")?;

        assert_eq!(member_names(dest.as_path())?, ["data.txt"]);
        assert_eq!(
            skipped.lock().unwrap().as_slice(),
            [SkipNotice {
                entry: "snap.tgz".to_string(),
                reason: SkipReason::ArchiveDestination,
            }]
        );
        Ok(())
    }
}
