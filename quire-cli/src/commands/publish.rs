//! `quire publish` / `quire unpublish` — batch writes to the remote.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use quire_core::PublishableItem;
use quire_sync::{BatchResult, UnpublishResult};

use super::status::warn_skipped;
use crate::workspace::Workspace;

/// Arguments for `quire publish`.
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Notes to publish, relative to the notes directory.
    pub paths: Vec<String>,

    /// Publish every new and modified note.
    #[arg(long, conflicts_with = "paths")]
    pub all: bool,
}

impl PublishArgs {
    pub async fn run(self, workspace: &Workspace) -> Result<()> {
        let items = if self.all {
            let overview = workspace
                .status_engine()
                .compute_overview(None)
                .await
                .context("failed to compute status")?;
            warn_skipped(&overview);
            overview.publish_candidates()
        } else if self.paths.is_empty() {
            bail!("provide one or more note paths or use --all");
        } else {
            self.paths.iter().map(|p| workspace.item(p)).collect()
        };

        if items.is_empty() {
            println!("✓ nothing to publish");
            return Ok(());
        }

        let result = workspace
            .orchestrator()
            .publish_batch(&items, None)
            .await
            .context("publish failed")?;
        print_publish(&result);

        if result.failed > 0 {
            bail!("{} of {} notes failed to publish", result.failed, result.total);
        }
        Ok(())
    }
}

/// Arguments for `quire unpublish`.
#[derive(Args, Debug)]
pub struct UnpublishArgs {
    /// Notes to remove from the remote.
    pub paths: Vec<String>,

    /// Unpublish every note reported as pending delete.
    #[arg(long, conflicts_with = "paths")]
    pub pending: bool,
}

impl UnpublishArgs {
    pub async fn run(self, workspace: &Workspace) -> Result<()> {
        let items: Vec<PublishableItem> = if self.pending {
            let overview = workspace
                .status_engine()
                .compute_overview(None)
                .await
                .context("failed to compute status")?;
            warn_skipped(&overview);
            overview.unpublish_candidates()
        } else if self.paths.is_empty() {
            bail!("provide one or more note paths or use --pending");
        } else {
            self.paths.iter().map(|p| workspace.item(p)).collect()
        };

        if items.is_empty() {
            println!("✓ nothing to unpublish");
            return Ok(());
        }

        let results = workspace
            .orchestrator()
            .unpublish_batch(&items)
            .await
            .context("unpublish failed")?;
        let failed = print_unpublish(&results);

        if failed > 0 {
            bail!("{failed} of {} notes failed to unpublish", results.len());
        }
        Ok(())
    }
}

fn print_publish(result: &BatchResult) {
    for item in &result.items {
        match &item.outcome {
            Ok(record) => println!(
                "  {} {} → {}",
                "✓".green(),
                item.item.path,
                record.remote_path.bright_black()
            ),
            Err(err) => println!("  {} {}: {err}", "✗".red(), item.item.path),
        }
    }
    println!(
        "published {} of {} ({} failed)",
        result.succeeded, result.total, result.failed
    );
}

fn print_unpublish(results: &[UnpublishResult]) -> usize {
    let mut failed = 0;
    for result in results {
        match &result.error {
            None => println!("  {} {}", "✓".green(), result.item.path),
            Some(err) => {
                failed += 1;
                println!("  {} {}: {err}", "✗".red(), result.item.path);
            }
        }
    }
    println!(
        "unpublished {} of {} ({failed} failed)",
        results.len() - failed,
        results.len()
    );
    failed
}
