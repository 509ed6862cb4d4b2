//! Publish status classification.
//!
//! Per listed item, in order:
//! 1. Not eligible and previously published → `PendingDelete`.
//! 2. Not eligible and never published → untracked (omitted).
//! 3. No record → `New`.
//! 4. Record hash equals current content hash → `Synced`, else `Modified`.
//!
//! Records whose item is no longer listed are orphans. With a valid remote
//! snapshot an orphan is only reported as `PendingDelete` while its remote
//! copy still exists; without one every orphan is reported.
//!
//! An item whose content cannot be read or parsed is left out of every
//! group and listed in [`StatusOverview::skipped`]; the rest of the
//! overview is still computed. Its record is not treated as an orphan.
//!
//! The engine never writes: records are only read.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use quire_core::{
    hashing::content_hash, ContentSource, ItemStatus, Progress, ProgressFn, PublishRecord,
    PublishableItem, QuireConfig, RecordMap, RecordStore,
};

use crate::remote_cache::RemoteSyncCache;
use crate::SyncError;

/// One classified item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub item: PublishableItem,
    pub status: ItemStatus,
    pub record: Option<PublishRecord>,
    /// `true` when `item` is a placeholder for a record without local content.
    pub orphaned: bool,
}

/// A listed item that could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub item: PublishableItem,
    pub reason: String,
}

/// Items grouped by status, each list in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusOverview {
    pub new: Vec<StatusEntry>,
    pub modified: Vec<StatusEntry>,
    pub synced: Vec<StatusEntry>,
    pub deleted: Vec<StatusEntry>,
    /// Not counted by [`len`](Self::len).
    pub skipped: Vec<SkippedItem>,
}

impl StatusOverview {
    fn push(&mut self, entry: StatusEntry) {
        match entry.status {
            ItemStatus::New => self.new.push(entry),
            ItemStatus::Modified { .. } => self.modified.push(entry),
            ItemStatus::Synced { .. } => self.synced.push(entry),
            ItemStatus::PendingDelete => self.deleted.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.modified.len() + self.synced.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = &StatusEntry> {
        self.new
            .iter()
            .chain(&self.modified)
            .chain(&self.synced)
            .chain(&self.deleted)
    }

    pub fn find(&self, path: &str) -> Option<&StatusEntry> {
        self.entries().find(|e| e.item.path == path)
    }

    /// Items that need a publish: new first, then modified.
    pub fn publish_candidates(&self) -> Vec<PublishableItem> {
        self.new
            .iter()
            .chain(&self.modified)
            .map(|e| e.item.clone())
            .collect()
    }

    pub fn unpublish_candidates(&self) -> Vec<PublishableItem> {
        self.deleted.iter().map(|e| e.item.clone()).collect()
    }
}

pub struct StatusEngine {
    content: Arc<dyn ContentSource>,
    records: Arc<dyn RecordStore>,
    cache: Option<Arc<RemoteSyncCache>>,
    chunk_size: usize,
}

impl StatusEngine {
    pub fn new(
        content: Arc<dyn ContentSource>,
        records: Arc<dyn RecordStore>,
        config: &QuireConfig,
    ) -> Self {
        Self {
            content,
            records,
            cache: None,
            chunk_size: config.status_chunk_size.max(1),
        }
    }

    pub fn with_cache(mut self, cache: Arc<RemoteSyncCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Classify every listed item and every orphaned record.
    ///
    /// Items are processed `chunk_size` at a time, yielding to the scheduler
    /// and reporting `(processed, total)` after each chunk. Chunking does not
    /// affect the result.
    pub async fn compute_overview(
        &self,
        on_progress: Option<&ProgressFn>,
    ) -> Result<StatusOverview, SyncError> {
        let items = self.content.list_publishable_items().await?;
        let records = self.records.get_all()?;
        let total = items.len();

        let mut overview = StatusOverview::default();
        let mut processed = 0;
        for chunk in items.chunks(self.chunk_size) {
            for item in chunk {
                let record = records.get(&item.path);
                match self.classify(item, record).await {
                    Ok(Some(status)) => overview.push(StatusEntry {
                        item: item.clone(),
                        status,
                        record: record.cloned(),
                        orphaned: false,
                    }),
                    Ok(None) => {}
                    Err(SyncError::Content(err)) => {
                        tracing::warn!(path = %item.path, error = %err, "skipping unreadable item");
                        overview.skipped.push(SkippedItem {
                            item: item.clone(),
                            reason: err.to_string(),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            processed += chunk.len();
            tracing::debug!(processed, total, "classified status chunk");
            if let Some(cb) = on_progress {
                cb(Progress { processed, total });
            }
            tokio::task::yield_now().await;
        }

        for (record, placeholder) in self.orphans(&items, records) {
            overview.push(StatusEntry {
                item: placeholder,
                status: ItemStatus::PendingDelete,
                record: Some(record),
                orphaned: true,
            });
        }

        Ok(overview)
    }

    /// Status of a single listed item; `None` if it is neither eligible nor
    /// previously published.
    pub async fn compute_item_status(
        &self,
        item: &PublishableItem,
    ) -> Result<Option<ItemStatus>, SyncError> {
        let record = self.records.get(&item.path)?;
        self.classify(item, record.as_ref()).await
    }

    /// Records with no listed item that should be reported as pending delete.
    pub async fn find_orphaned_records(
        &self,
    ) -> Result<Vec<(PublishRecord, PublishableItem)>, SyncError> {
        let items = self.content.list_publishable_items().await?;
        let records = self.records.get_all()?;
        Ok(self.orphans(&items, records))
    }

    async fn classify(
        &self,
        item: &PublishableItem,
        record: Option<&PublishRecord>,
    ) -> Result<Option<ItemStatus>, SyncError> {
        if !self.content.is_publish_eligible(item).await? {
            return Ok(record.map(|_| ItemStatus::PendingDelete));
        }
        let Some(record) = record else {
            return Ok(Some(ItemStatus::New));
        };
        let bytes = self.content.read_content(item).await?;
        let local_hash = content_hash(&bytes);
        if local_hash == record.content_hash {
            Ok(Some(ItemStatus::Synced { local_hash }))
        } else {
            Ok(Some(ItemStatus::Modified { local_hash }))
        }
    }

    fn orphans(
        &self,
        items: &[PublishableItem],
        records: RecordMap,
    ) -> Vec<(PublishRecord, PublishableItem)> {
        let listed: HashSet<&str> = items.iter().map(|i| i.path.as_str()).collect();
        let snapshot = self.cache.as_ref().and_then(|c| c.valid_snapshot());

        records
            .into_values()
            .filter(|record| !listed.contains(record.local_path.as_str()))
            .filter(|record| match &snapshot {
                Some(snapshot) => {
                    let present = snapshot.contains(&record.remote_path);
                    if !present {
                        tracing::debug!(
                            path = %record.local_path,
                            "orphaned record already gone remotely; omitted"
                        );
                    }
                    present
                }
                None => true,
            })
            .map(|record| {
                let placeholder = record.placeholder();
                (record, placeholder)
            })
            .collect()
    }
}
