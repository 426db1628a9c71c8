//! Walkthrough of a confined workspace: writes, a rejected escape, a dry-run
//! preview, a scoped temp directory and a snapshot.
//
//! NOTE: This example prints to stdout to show what each step returns.
#![allow(clippy::print_stdout, clippy::doc_markdown)]

use safe_workspace_fs::{Outcome, SafeFs, SafeFsError, create_snapshot_tar};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = std::env::temp_dir().join("safe_workspace_example");
    std::fs::create_dir_all(&root)?;
    let safe_fs = SafeFs::new(&root)?;

    println!("Workspace root: {}", safe_fs.root().display());
    println!();

    // === CONFINED WRITES ===
    let _ = safe_fs.write("project/README.md", "# Example project\n")?;
    let _ = safe_fs.write("project/src/main.rs", "fn main() {}\n")?;
    println!("Wrote project/README.md and project/src/main.rs");

    match safe_fs.write("../outside.txt", "nope") {
        Err(SafeFsError::PathTraversal { requested, .. }) => {
            println!("Rejected escape attempt: {requested}");
        }
        other => println!("Unexpected result: {other:?}"),
    }
    println!();

    // === DRY RUN ===
    let preview = SafeFs::builder().root(&root).dry_run(true).build()?;
    if let Outcome::Planned(plan) = preview.rm_tree("project")? {
        println!("Dry run: removing '{}' would delete:", plan.target);
        for path in &plan.would_delete {
            println!("  {path}");
        }
    }
    println!();

    // === SCOPED TEMP DIRECTORY ===
    {
        let guard = safe_fs.tmp().scoped("build")?;
        std::fs::write(guard.path().join("scratch.bin"), b"intermediate")?;
        println!("Temp directory in use: {}", guard.dir().relative());
    }
    println!("Temp directory removed on scope exit");
    println!();

    // === SNAPSHOT ===
    if let Outcome::Executed(archive) =
        create_snapshot_tar(&safe_fs, "project", "exports/project.tar.gz", false, true)?
    {
        let size = safe_fs.metadata(archive.relative())?.len();
        println!("Snapshot written to {archive} ({size} bytes)");
    }

    let _ = safe_fs.rm_tree("")?;
    println!("Workspace emptied");
    Ok(())
}
