use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    io::{Read, Write},
    path::PathBuf,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use safe_workspace_fs::{
    CleanupStatus, EntryKind, Outcome, Plan, SafeFs, SafeFsError, SandboxConfig,
    create_snapshot_tar,
};

#[derive(Parser)]
#[command(name = "workspace-sandbox")]
#[command(version)]
#[command(about = "Run file operations confined to a workspace root")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workspace root (overrides config file)
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Refuse every mutating operation
    #[arg(long)]
    readonly: bool,

    /// Print plans instead of performing destructive operations
    #[arg(long)]
    dry_run: bool,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Write a file from --content or stdin
    Write {
        path: String,
        #[arg(long)]
        content: Option<String>,
    },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Remove a file or directory tree
    Rm { path: String },
    /// Archive a directory into a .tar.gz
    Snapshot {
        source: String,
        dest: String,
        /// Include entries whose name starts with '.'
        #[arg(long)]
        include_hidden: bool,
        /// Overwrite an existing archive
        #[arg(long)]
        force: bool,
    },
    /// Manage temporary directories under the workspace
    Tmp {
        #[command(subcommand)]
        action: TmpCommand,
    },
}

#[derive(Subcommand)]
enum TmpCommand {
    /// Create a uniquely named temporary directory
    Make {
        #[arg(default_value = "job")]
        prefix: String,
    },
    /// Remove a temporary directory created by `tmp make`
    Cleanup { path: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    let log_filter = format!(
        "workspace_sandbox={level},safe_workspace_fs={level}",
        level = cli.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli) {
        let code = e
            .downcast_ref::<SafeFsError>()
            .map_or(1, |err| err.kind().exit_code());
        eprintln!("Error: {e:#}");
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let safe_fs = SafeFs::from_config(&config)?;
    info!(
        "Workspace ready at {} (readonly: {}, dry_run: {})",
        safe_fs.root().display(),
        config.readonly,
        config.dry_run
    );

    match cli.command {
        Command::Ls { path } => {
            for entry in safe_fs.list_dir(&path)? {
                let suffix = match entry.kind {
                    EntryKind::Directory => "/",
                    EntryKind::Symlink => "@",
                    EntryKind::File | EntryKind::Other => "",
                };
                println!("{}{}", entry.name, suffix);
            }
        }
        Command::Cat { path } => {
            let contents = safe_fs.read(&path)?;
            std::io::stdout()
                .write_all(&contents)
                .context("failed to write to stdout")?;
        }
        Command::Write { path, content } => {
            let bytes = match content {
                Some(content) => content.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("failed to read stdin")?;
                    buf
                }
            };
            report(safe_fs.write(&path, bytes)?, |()| format!("wrote {path}"))?;
        }
        Command::Mkdir { path } => {
            let created = safe_fs.mkdir_p(&path)?;
            println!("created {created}");
        }
        Command::Rm { path } => {
            report(safe_fs.rm_tree(&path)?, |()| format!("removed {path}"))?;
        }
        Command::Snapshot {
            source,
            dest,
            include_hidden,
            force,
        } => {
            let outcome = create_snapshot_tar(&safe_fs, &source, &dest, include_hidden, force)?;
            report(outcome, |archive| format!("snapshot written to {archive}"))?;
        }
        Command::Tmp { action } => match action {
            TmpCommand::Make { prefix } => {
                let dir = safe_fs.tmp().make(&prefix)?;
                println!("{}", dir.relative());
            }
            TmpCommand::Cleanup { path } => {
                let status = match safe_fs.tmp().cleanup(&path)? {
                    CleanupStatus::Removed => "removed",
                    CleanupStatus::Absent => "absent",
                    CleanupStatus::Refused => "refused",
                };
                println!("{status}");
            }
        },
    }

    Ok(())
}

/// Merge the optional config file with command-line overrides.
fn load_config(cli: &Cli) -> Result<SandboxConfig> {
    let mut config = match (&cli.config, &cli.root) {
        (Some(path), _) => {
            let config = SandboxConfig::load_from_file(path)?;
            info!("Configuration loaded from: {}", path.display());
            config
        }
        (None, Some(root)) => SandboxConfig::new(root),
        (None, None) => {
            return Err(SafeFsError::Configuration {
                message: "no workspace root given; pass --root or --config".to_string(),
            }
            .into());
        }
    };

    if let Some(root) = &cli.root {
        config.root.clone_from(root);
    }
    config.readonly |= cli.readonly;
    config.dry_run |= cli.dry_run;
    Ok(config)
}

/// Print either the executed summary or the plan as JSON.
fn report<T>(outcome: Outcome<T>, executed: impl FnOnce(T) -> String) -> Result<()> {
    match outcome {
        Outcome::Executed(value) => println!("{}", executed(value)),
        Outcome::Planned(plan) => print_plan(&plan)?,
    }
    Ok(())
}

fn print_plan(plan: &Plan) -> Result<()> {
    let json = serde_json::to_string_pretty(plan).context("failed to serialize plan")?;
    println!("{json}");
    Ok(())
}
