//! `quire site-config` — compare-and-swap edits of the shared site
//! configuration.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;

use quire_sync::{ConflictResolution, ResolveOutcome, SaveOutcome};

use crate::workspace::Workspace;

#[derive(Subcommand, Debug)]
pub enum SiteConfigCommand {
    /// Print the remote site configuration and its version.
    Show,

    /// Upload a local file as the new site configuration.
    Push {
        /// Local file with the new configuration.
        file: PathBuf,

        /// Version the edit started from (omit when creating it).
        #[arg(long)]
        baseline: Option<String>,

        /// What to do when the remote changed since `--baseline`.
        #[arg(long, value_enum, default_value_t = OnConflict::Cancel)]
        on_conflict: OnConflict,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Leave everything untouched and exit with an error.
    Cancel,
    /// Replace the local file with the remote copy.
    Reload,
    /// Overwrite the remote change.
    Force,
}

impl From<OnConflict> for ConflictResolution {
    fn from(value: OnConflict) -> Self {
        match value {
            OnConflict::Cancel => ConflictResolution::Cancel,
            OnConflict::Reload => ConflictResolution::Reload,
            OnConflict::Force => ConflictResolution::ForceOverwrite,
        }
    }
}

pub async fn run(command: SiteConfigCommand, workspace: &Workspace) -> Result<()> {
    match command {
        SiteConfigCommand::Show => show(workspace).await,
        SiteConfigCommand::Push {
            file,
            baseline,
            on_conflict,
        } => push(workspace, file, baseline, on_conflict).await,
    }
}

async fn show(workspace: &Workspace) -> Result<()> {
    let writer = workspace.site_config_writer();
    let Some(current) = writer
        .load()
        .await
        .context("failed to read site configuration")?
    else {
        println!("No site configuration at '{}'.", writer.path());
        return Ok(());
    };
    eprintln!("{} {}", "version:".bold(), current.version);
    print!("{}", String::from_utf8_lossy(&current.bytes));
    Ok(())
}

async fn push(
    workspace: &Workspace,
    file: PathBuf,
    baseline: Option<String>,
    on_conflict: OnConflict,
) -> Result<()> {
    let bytes =
        std::fs::read(&file).with_context(|| format!("failed to read '{}'", file.display()))?;
    let writer = workspace.site_config_writer();
    let description = format!("update {}", writer.path());

    let conflict = match writer
        .save(&bytes, baseline.as_deref(), &description)
        .await
        .context("failed to save site configuration")?
    {
        SaveOutcome::Saved { version } => {
            println!("✓ saved {} (version {version})", writer.path());
            return Ok(());
        }
        SaveOutcome::Conflict(conflict) => conflict,
    };

    let found = conflict.remote_version.as_deref().unwrap_or("<absent>");
    eprintln!(
        "{} '{}' changed remotely (baseline {}, found {found})",
        "conflict:".yellow().bold(),
        conflict.path,
        baseline.as_deref().unwrap_or("<none>"),
    );

    match writer
        .resolve(&conflict, on_conflict.into(), &bytes, &description)
        .await
        .context("failed to resolve conflict")?
    {
        ResolveOutcome::Saved { version } => {
            println!("✓ overwrote {} (version {version})", writer.path());
            Ok(())
        }
        ResolveOutcome::Reloaded { content, version } => {
            std::fs::write(&file, content.unwrap_or_default())
                .with_context(|| format!("failed to write '{}'", file.display()))?;
            println!(
                "reloaded '{}' from the remote; new baseline {}",
                file.display(),
                version.as_deref().unwrap_or("<none>")
            );
            Ok(())
        }
        ResolveOutcome::Conflict(again) => bail!(
            "remote changed again (now {}); nothing written",
            again.remote_version.as_deref().unwrap_or("<absent>")
        ),
        ResolveOutcome::Cancelled => {
            bail!("site configuration not saved; remote is at version {found}")
        }
    }
}
