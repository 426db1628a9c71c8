//! # Safe Workspace FS
//!
//! Filesystem access confined to a workspace root, for tooling that acts on
//! attacker- or bug-influenced paths (indexers, snapshot/export commands,
//! ephemeral job workspaces).
//!
//! Every operation resolves its path against the root first, following every
//! symlink, and fails if the result escapes. Only then is the immutable
//! readonly/dry-run policy consulted, and only then is anything performed.
//!
//! ## Features
//!
//! - **Confinement**: `..`, absolute-looking paths and symlink indirection can
//!   never reach outside the root
//! - **Readonly policy**: every mutation fails with a policy error
//! - **Dry-run policy**: destructive operations return a [`Plan`] instead
//! - **Scoped temp dirs**: per-job directories under `<root>/.tmp`, never in
//!   host-shared temporary storage
//! - **Snapshots**: reproducible `.tar.gz` archives of a confined subtree
//!
//! ## Basic Usage
//!
//! ```rust
//! use safe_workspace_fs::SafeFs;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let safe_fs = SafeFs::builder()
//!     .root("/srv/workspace")
//!     .build()?;
//!
//! let _ = safe_fs.write("a/b/c.txt", "hi")?;
//! assert_eq!(safe_fs.read_to_string("a/b/c.txt")?, "hi");
//!
//! for entry in safe_fs.list_dir("a/b")? {
//!     println!("{} ({:?})", entry.name, entry.kind);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Dry Run
//!
//! ```rust
//! use safe_workspace_fs::{Outcome, SafeFs};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let safe_fs = SafeFs::builder()
//!     .root("/srv/workspace")
//!     .dry_run(true)
//!     .build()?;
//!
//! match safe_fs.rm_tree("build")? {
//!     Outcome::Planned(plan) => println!("would delete {:?}", plan.would_delete),
//!     Outcome::Executed(()) => unreachable!("dry run never deletes"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Temporary Directories
//!
//! ```rust
//! use safe_workspace_fs::SafeFs;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let safe_fs = SafeFs::new("/srv/workspace")?;
//! let tmp = safe_fs.tmp();
//!
//! // Removed when `guard` goes out of scope, on every exit path
//! let guard = tmp.scoped("index-job")?;
//! std::fs::write(guard.path().join("chunk.bin"), b"...")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Snapshots
//!
//! ```rust
//! use safe_workspace_fs::{SafeFs, create_snapshot_tar};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let safe_fs = SafeFs::new("/srv/workspace")?;
//! let archive = create_snapshot_tar(&safe_fs, "docs", "exports/docs.tar.gz", false, false)?;
//! # Ok(())
//! # }
//! ```
//!
//! **❌ Rejected paths:**
//! ```rust,ignore
//! safe_fs.write("../../../etc/passwd", "evil")?;   // PathTraversal
//! safe_fs.write("link-to-etc/passwd", "evil")?;    // PathTraversal, once the symlink is followed
//! safe_fs.write("file\0.txt", "evil")?;            // InvalidPath
//! ```

pub mod config;
pub mod error;
pub mod fs;
pub mod observer;
pub mod policy;
pub mod resolver;
pub mod security;
pub mod snapshot;
pub mod tmp;

pub use config::SandboxConfig;
pub use error::{ErrorKind, Result, SafeFsError};
pub use fs::{DirEntry, EntryKind, SafeFs, SafeFsBuilder};
pub use observer::{SkipNotice, SkipObserver, SkipReason, TracingSkipObserver};
pub use policy::{Gate, Operation, Outcome, PathSafetyPolicy, Plan};
pub use resolver::{ResolvedPath, resolve};
pub use snapshot::{SnapshotArchiver, create_snapshot_tar};
pub use tmp::{CleanupStatus, SafeTmp, TempDirGuard, TempDirectory};
