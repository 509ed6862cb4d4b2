//! `quire diff <path>` — remote copy vs. local note.

use anyhow::{Context, Result};
use clap::Args;

use quire_sync::diff_item;

use crate::workspace::Workspace;

/// Arguments for `quire diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Note to diff, relative to the notes directory.
    pub path: String,
}

impl DiffArgs {
    pub async fn run(self, workspace: &Workspace) -> Result<()> {
        let item = workspace.item(&self.path);
        let diff = diff_item(
            workspace.content.as_ref(),
            workspace.remote.as_ref(),
            &workspace.config,
            &item,
        )
        .await
        .with_context(|| format!("diff failed for '{}'", self.path))?;

        if diff.is_empty() {
            println!("No differences for '{}'.", item.path);
            return Ok(());
        }

        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
