//! Quire — publish notes to a remote repository and keep track of what
//! changed since.
//!
//! # Usage
//!
//! ```text
//! quire [--root <dir>] [--remote <dir>] status [--json] [--refresh]
//! quire publish [<path>...] [--all]
//! quire unpublish [<path>...] [--pending]
//! quire diff <path>
//! quire cleanup
//! quire site-config show
//! quire site-config push <file> [--baseline <version>] [--on-conflict cancel|reload|force]
//! ```
//!
//! Set `QUIRE_LOG` (e.g. `QUIRE_LOG=debug`) for diagnostic output on stderr.

mod commands;
mod workspace;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    cleanup::CleanupArgs, diff::DiffArgs, publish::PublishArgs, publish::UnpublishArgs,
    site_config::SiteConfigCommand, status::StatusArgs,
};
use workspace::Workspace;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "quire",
    version,
    about = "Publish notes to a remote repository and track their state",
    long_about = None,
)]
struct Cli {
    /// Notes directory (holds `.quire/`).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Directory acting as the remote repository. Overrides `remote_dir`
    /// from `.quire/config.yaml`.
    #[arg(long, global = true)]
    remote: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show which notes are new, modified, synced, or pending delete.
    Status(StatusArgs),

    /// Publish notes (or every new and modified note with --all).
    Publish(PublishArgs),

    /// Remove published notes from the remote.
    Unpublish(UnpublishArgs),

    /// Show a unified diff of the remote copy against the local note.
    Diff(DiffArgs),

    /// Drop records whose remote copy no longer exists.
    Cleanup(CleanupArgs),

    /// Read or update the shared site configuration.
    SiteConfig {
        #[command(subcommand)]
        command: SiteConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let workspace = Workspace::open(&cli.root, cli.remote.as_deref())?;
    match cli.command {
        Commands::Status(args) => args.run(&workspace).await,
        Commands::Publish(args) => args.run(&workspace).await,
        Commands::Unpublish(args) => args.run(&workspace).await,
        Commands::Diff(args) => args.run(&workspace).await,
        Commands::Cleanup(args) => args.run(&workspace).await,
        Commands::SiteConfig { command } => commands::site_config::run(command, &workspace).await,
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("QUIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
