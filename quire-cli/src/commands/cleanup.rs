//! `quire cleanup` — forget records whose remote copy is gone.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;

use quire_sync::remove_stale_records;

use crate::workspace::Workspace;

/// Arguments for `quire cleanup`.
#[derive(Args, Debug)]
pub struct CleanupArgs {}

impl CleanupArgs {
    pub async fn run(self, workspace: &Workspace) -> Result<()> {
        let outcome = workspace.cache.fetch(None).await;
        if let Some(err) = outcome.error {
            return Err(anyhow!(err)).context("failed to fetch remote listing");
        }
        let snapshot = workspace
            .cache
            .valid_snapshot()
            .context("remote listing expired before cleanup could run")?;

        let removed = remove_stale_records(workspace.records.as_ref(), &snapshot)
            .context("cleanup failed")?;
        if removed.is_empty() {
            println!("✓ no stale records");
            return Ok(());
        }
        for record in &removed {
            println!(
                "  {} {} ({} missing remotely)",
                "−".red(),
                record.local_path,
                record.remote_path
            );
        }
        println!("removed {} stale records", removed.len());
        Ok(())
    }
}
