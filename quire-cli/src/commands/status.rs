//! `quire status` — publish state of every note.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use quire_core::ItemStatus;
use quire_sync::{StatusEntry, StatusOverview};

use crate::workspace::Workspace;

/// Arguments for `quire status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Fetch the remote listing first so notes deleted locally are only
    /// reported while their remote copy still exists.
    #[arg(long)]
    pub refresh: bool,
}

impl StatusArgs {
    pub async fn run(self, workspace: &Workspace) -> Result<()> {
        if self.refresh {
            let outcome = workspace.cache.fetch(None).await;
            if let Some(err) = outcome.error {
                eprintln!(
                    "{} could not fetch remote listing: {err}",
                    "warning:".yellow().bold()
                );
            }
        }

        let overview = workspace
            .status_engine()
            .compute_overview(None)
            .await
            .context("failed to compute status")?;

        if self.json {
            print_json(&overview)?;
        } else {
            warn_skipped(&overview);
            print_table(workspace, &overview);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    summary: StatusSummaryJson,
    items: Vec<ItemStatusJson<'a>>,
    skipped: Vec<SkippedJson<'a>>,
}

#[derive(Serialize)]
struct SkippedJson<'a> {
    path: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    new: usize,
    modified: usize,
    synced: usize,
    deleted: usize,
}

#[derive(Serialize)]
struct ItemStatusJson<'a> {
    path: &'a str,
    status: &'static str,
    local_hash: Option<&'a str>,
    remote_path: Option<&'a str>,
    published_at: Option<String>,
    orphaned: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "note")]
    note: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last publish")]
    last_publish: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_json(overview: &StatusOverview) -> Result<()> {
    let payload = StatusReportJson {
        summary: summary(overview),
        items: overview
            .entries()
            .map(|entry| ItemStatusJson {
                path: &entry.item.path,
                status: entry.status.key(),
                local_hash: local_hash(&entry.status),
                remote_path: entry.record.as_ref().map(|r| r.remote_path.as_str()),
                published_at: entry.record.as_ref().map(|r| r.published_at.to_rfc3339()),
                orphaned: entry.orphaned,
            })
            .collect(),
        skipped: overview
            .skipped
            .iter()
            .map(|s| SkippedJson {
                path: &s.item.path,
                reason: &s.reason,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(workspace: &Workspace, overview: &StatusOverview) {
    let counts = summary(overview);
    println!(
        "Quire v{} | {} | {} new | {} modified | {} synced | {} pending delete",
        env!("CARGO_PKG_VERSION"),
        workspace.root.display(),
        counts.new,
        counts.modified,
        counts.synced,
        counts.deleted,
    );

    if overview.is_empty() {
        println!("No notes marked for publishing.");
        return;
    }

    let rows: Vec<StatusTableRow> = overview.entries().map(table_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if counts.new + counts.modified > 0 {
        println!("Run 'quire publish --all' to publish new and modified notes.");
    }
    if counts.deleted > 0 {
        println!("Run 'quire unpublish --pending' to remove retracted notes.");
    }
}

/// One stderr line per note the overview could not classify.
pub(crate) fn warn_skipped(overview: &StatusOverview) {
    for skipped in &overview.skipped {
        eprintln!(
            "{} skipped {}: {}",
            "warning:".yellow().bold(),
            skipped.item.path,
            skipped.reason
        );
    }
}

fn summary(overview: &StatusOverview) -> StatusSummaryJson {
    StatusSummaryJson {
        new: overview.new.len(),
        modified: overview.modified.len(),
        synced: overview.synced.len(),
        deleted: overview.deleted.len(),
    }
}

fn table_row(entry: &StatusEntry) -> StatusTableRow {
    let detail = match (&entry.status, entry.orphaned) {
        (ItemStatus::PendingDelete, true) => "local file removed".to_string(),
        (ItemStatus::PendingDelete, false) => "no longer marked publish".to_string(),
        (status, _) => local_hash(status)
            .map(|h| format!("sha256 {}", &h[..h.len().min(12)]))
            .unwrap_or_default(),
    };
    StatusTableRow {
        note: entry.item.path.clone(),
        status: status_label(&entry.status),
        last_publish: entry
            .record
            .as_ref()
            .map(|r| format_age(r.published_at))
            .unwrap_or_else(|| "never".to_string()),
        detail,
    }
}

fn local_hash(status: &ItemStatus) -> Option<&str> {
    match status {
        ItemStatus::Modified { local_hash } | ItemStatus::Synced { local_hash } => {
            Some(local_hash.as_str())
        }
        ItemStatus::New | ItemStatus::PendingDelete => None,
    }
}

fn status_label(status: &ItemStatus) -> String {
    match status {
        ItemStatus::New => "● NEW".blue().bold().to_string(),
        ItemStatus::Modified { .. } => "● MODIFIED".yellow().bold().to_string(),
        ItemStatus::Synced { .. } => "● SYNCED".green().bold().to_string(),
        ItemStatus::PendingDelete => "● DELETED".red().bold().to_string(),
    }
}

fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0);
    match seconds {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_age_buckets() {
        assert_eq!(format_age(Utc::now()), "0s ago");
        assert_eq!(format_age(Utc::now() - Duration::seconds(125)), "2m ago");
        assert_eq!(format_age(Utc::now() - Duration::hours(5)), "5h ago");
        assert_eq!(format_age(Utc::now() - Duration::days(3)), "3d ago");
    }
}
