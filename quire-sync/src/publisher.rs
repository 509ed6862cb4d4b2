//! Batch publish / unpublish.
//!
//! ## Publishing one item
//!
//! 1. Load the existing record and read the local bytes. Either failing
//!    fails the item before anything is written.
//! 2. Resolve the remote path (`<content_root>/<local path>`).
//! 3. Look up the current remote version; absent (or `NotFound`) means create.
//! 4. Write, passing that version as the precondition.
//! 5. Upload attachments (best-effort) and drop ones the note no longer lists.
//! 6. Upsert the record with the new content hash and remote version.
//!
//! ## Batches
//!
//! Items run strictly in input order, one at a time, with a fixed pause
//! between items. A failing item is recorded and the batch moves on; only
//! batch-level preconditions (empty batch, another batch in flight) fail
//! the call itself. A cancelled batch reports every item it did not start
//! as `Aborted`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use quire_core::{
    hashing::content_hash, AttachmentRecord, ContentSource, Progress, ProgressFn, PublishRecord,
    PublishableItem, QuireConfig, RecordStore, RemoteError, RemoteRepository,
};

use crate::SyncError;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of publishing one item.
#[derive(Debug)]
pub struct ItemResult {
    pub item: PublishableItem,
    pub outcome: Result<PublishRecord, SyncError>,
}

impl ItemResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Tally of a publish batch. `succeeded + failed == total`.
#[derive(Debug)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<ItemResult>,
}

impl BatchResult {
    fn from_items(items: Vec<ItemResult>) -> Self {
        let succeeded = items.iter().filter(|r| r.succeeded()).count();
        Self {
            total: items.len(),
            succeeded,
            failed: items.len() - succeeded,
            items,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|r| !r.succeeded())
    }
}

/// Outcome of unpublishing one item.
#[derive(Debug)]
pub struct UnpublishResult {
    pub succeeded: bool,
    pub item: PublishableItem,
    pub error: Option<SyncError>,
}

impl UnpublishResult {
    fn from_outcome(item: PublishableItem, outcome: Result<PublishRecord, SyncError>) -> Self {
        match outcome {
            Ok(_) => Self {
                succeeded: true,
                item,
                error: None,
            },
            Err(err) => Self {
                succeeded: false,
                item,
                error: Some(err),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Per-record locks shared between orchestrators.
///
/// The single-flight guard only covers one orchestrator; give every
/// orchestrator that can run concurrently a clone of the same
/// `RecordLocks` to keep two of them off the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key`, or `None` if someone else holds it.
    pub fn try_acquire(&self, key: &str) -> Option<RecordLockGuard> {
        if !self.lock().insert(key.to_string()) {
            return None;
        }
        Some(RecordLockGuard {
            locks: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Releases its record lock on drop.
#[derive(Debug)]
pub struct RecordLockGuard {
    locks: RecordLocks,
    key: String,
}

impl Drop for RecordLockGuard {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.key);
    }
}

/// Clears the in-flight marker on drop.
struct FlightGuard<'a> {
    slot: &'a Mutex<Option<&'static str>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct PublishOrchestrator {
    content: Arc<dyn ContentSource>,
    remote: Arc<dyn RemoteRepository>,
    records: Arc<dyn RecordStore>,
    config: QuireConfig,
    in_flight: Mutex<Option<&'static str>>,
    locks: Option<RecordLocks>,
}

impl PublishOrchestrator {
    pub fn new(
        content: Arc<dyn ContentSource>,
        remote: Arc<dyn RemoteRepository>,
        records: Arc<dyn RecordStore>,
        config: QuireConfig,
    ) -> Self {
        Self {
            content,
            remote,
            records,
            config,
            in_flight: Mutex::new(None),
            locks: None,
        }
    }

    pub fn with_locks(mut self, locks: RecordLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    /// `true` while a publish or unpublish batch runs on this instance.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    pub async fn publish_batch(
        &self,
        items: &[PublishableItem],
        on_progress: Option<&ProgressFn>,
    ) -> Result<BatchResult, SyncError> {
        self.publish_batch_with_cancel(items, on_progress, &CancellationToken::new())
            .await
    }

    pub async fn publish_batch_with_cancel(
        &self,
        items: &[PublishableItem],
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, SyncError> {
        if items.is_empty() {
            return Err(SyncError::Validation("empty publish batch".to_string()));
        }
        let _flight = self.begin("publish")?;
        let total = items.len();
        tracing::info!(total, "publish batch started");

        let mut results = Vec::with_capacity(total);
        for (index, item) in items.iter().enumerate() {
            let outcome = if self.proceed(index, cancel).await {
                let outcome = self.publish_one(item).await;
                if let Err(err) = &outcome {
                    tracing::warn!(path = %item.path, error = %err, "publish failed");
                }
                outcome
            } else {
                Err(SyncError::Aborted)
            };
            results.push(ItemResult {
                item: item.clone(),
                outcome,
            });
            // Aborted items count as processed too.
            if let Some(cb) = on_progress {
                cb(Progress {
                    processed: index + 1,
                    total,
                });
            }
        }

        let result = BatchResult::from_items(results);
        tracing::info!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "publish batch finished"
        );
        Ok(result)
    }

    pub async fn unpublish_batch(
        &self,
        items: &[PublishableItem],
    ) -> Result<Vec<UnpublishResult>, SyncError> {
        self.unpublish_batch_with_cancel(items, &CancellationToken::new())
            .await
    }

    pub async fn unpublish_batch_with_cancel(
        &self,
        items: &[PublishableItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<UnpublishResult>, SyncError> {
        if items.is_empty() {
            return Err(SyncError::Validation("empty unpublish batch".to_string()));
        }
        let _flight = self.begin("unpublish")?;

        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if !self.proceed(index, cancel).await {
                results.push(UnpublishResult::from_outcome(
                    item.clone(),
                    Err(SyncError::Aborted),
                ));
                continue;
            }
            let outcome = self.unpublish_one(item).await;
            if let Err(err) = &outcome {
                tracing::warn!(path = %item.path, error = %err, "unpublish failed");
            }
            results.push(UnpublishResult::from_outcome(item.clone(), outcome));
        }
        Ok(results)
    }

    fn begin(&self, operation: &'static str) -> Result<FlightGuard<'_>, SyncError> {
        let mut slot = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(running) = *slot {
            tracing::warn!(requested = operation, running, "batch refused: busy");
            return Err(SyncError::Busy { operation: running });
        }
        *slot = Some(operation);
        Ok(FlightGuard {
            slot: &self.in_flight,
        })
    }

    /// Pause before every item but the first. `false` once cancelled.
    async fn proceed(&self, index: usize, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let delay = self.config.publish_delay();
        if index == 0 || delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn lock_item(&self, item: &PublishableItem) -> Result<Option<RecordLockGuard>, SyncError> {
        let Some(locks) = &self.locks else {
            return Ok(None);
        };
        locks
            .try_acquire(&item.path)
            .map(Some)
            .ok_or_else(|| SyncError::ItemLocked {
                path: item.path.clone(),
            })
    }

    async fn current_version(&self, remote_path: &str) -> Result<Option<String>, SyncError> {
        match self.remote.get_object(remote_path).await {
            Ok(object) => Ok(object.map(|o| o.version)),
            Err(RemoteError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn publish_one(&self, item: &PublishableItem) -> Result<PublishRecord, SyncError> {
        let _lock = self.lock_item(item)?;
        let previous = self.records.get(&item.path)?;
        let bytes = self.content.read_content(item).await?;
        let remote_path = self.config.remote_path_for(&item.path);
        let existing = self.current_version(&remote_path).await?;

        let action = if existing.is_some() { "update" } else { "publish" };
        let message = self.config.commit_message(action, &item.path);
        let remote_sha = self
            .remote
            .put_object(&remote_path, &bytes, &message, existing.as_deref())
            .await?;

        let attachments = self.sync_attachments(item, previous.as_ref()).await;

        let record = PublishRecord {
            id: item.id.clone(),
            local_path: item.path.clone(),
            remote_path,
            content_hash: content_hash(&bytes),
            remote_sha,
            published_at: Utc::now(),
            attachments,
        };
        if let Err(err) = self.records.upsert(&item.path, record.clone()) {
            tracing::error!(
                path = %item.path,
                remote_sha = %record.remote_sha,
                error = %err,
                "remote write succeeded but the record could not be saved"
            );
            return Err(err.into());
        }

        tracing::info!(path = %item.path, remote = %record.remote_path, "published");
        Ok(record)
    }

    /// Upload current attachments and drop ones no longer referenced.
    /// Failures are logged and leave the attachment out of the record.
    async fn sync_attachments(
        &self,
        item: &PublishableItem,
        previous: Option<&PublishRecord>,
    ) -> Vec<AttachmentRecord> {
        let attachments = match self.content.attachments(item).await {
            Ok(attachments) => attachments,
            Err(err) => {
                tracing::warn!(path = %item.path, error = %err, "could not read attachments");
                return previous.map(|r| r.attachments.clone()).unwrap_or_default();
            }
        };

        let mut uploaded = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let remote_path = self.config.attachment_path_for(&item.path, &attachment.name);
            let message = self.config.commit_message("attach", &remote_path);
            let result = match self.current_version(&remote_path).await {
                Ok(existing) => self
                    .remote
                    .put_object(&remote_path, &attachment.bytes, &message, existing.as_deref())
                    .await
                    .map_err(SyncError::from),
                Err(err) => Err(err),
            };
            match result {
                Ok(remote_sha) => uploaded.push(AttachmentRecord {
                    name: attachment.name,
                    remote_path,
                    remote_sha,
                }),
                Err(err) => {
                    tracing::warn!(path = %remote_path, error = %err, "attachment upload failed");
                }
            }
        }

        if let Some(previous) = previous {
            let kept: HashSet<&str> = uploaded.iter().map(|a| a.remote_path.as_str()).collect();
            let stale: Vec<AttachmentRecord> = previous
                .attachments
                .iter()
                .filter(|a| !kept.contains(a.remote_path.as_str()))
                .cloned()
                .collect();
            for attachment in &stale {
                self.delete_attachment(attachment).await;
            }
        }
        uploaded
    }

    async fn delete_attachment(&self, attachment: &AttachmentRecord) {
        let message = self.config.commit_message("detach", &attachment.remote_path);
        match self
            .remote
            .delete_object(&attachment.remote_path, &attachment.remote_sha, &message)
            .await
        {
            Ok(()) | Err(RemoteError::NotFound { .. }) => {}
            Err(err) => {
                tracing::warn!(
                    path = %attachment.remote_path,
                    error = %err,
                    "attachment delete failed"
                );
            }
        }
    }

    async fn unpublish_one(&self, item: &PublishableItem) -> Result<PublishRecord, SyncError> {
        let _lock = self.lock_item(item)?;
        let Some(record) = self.records.get(&item.path)? else {
            return Err(SyncError::Validation(format!(
                "no record found for {}",
                item.path
            )));
        };

        let message = self.config.commit_message("unpublish", &item.path);
        match self
            .remote
            .delete_object(&record.remote_path, &record.remote_sha, &message)
            .await
        {
            Ok(()) => {}
            Err(RemoteError::NotFound { .. }) => {
                tracing::debug!(path = %record.remote_path, "remote copy already gone");
            }
            Err(err) => return Err(err.into()),
        }

        for attachment in &record.attachments {
            self.delete_attachment(attachment).await;
        }

        self.records.remove(&item.path)?;
        tracing::info!(path = %item.path, "unpublished");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{
        remote::{RemoteCall, RemoteOp},
        MemoryContentSource, MemoryRecordStore, MemoryRemote, RecordMap, StoreError,
    };

    /// Store whose reads always fail.
    struct UnreadableStore;

    impl RecordStore for UnreadableStore {
        fn get_all(&self) -> Result<RecordMap, StoreError> {
            Err(StoreError::Poisoned)
        }

        fn upsert(&self, _key: &str, _record: PublishRecord) -> Result<(), StoreError> {
            Ok(())
        }

        fn remove(&self, _key: &str) -> Result<Option<PublishRecord>, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    struct Fixture {
        content: Arc<MemoryContentSource>,
        remote: Arc<MemoryRemote>,
        records: Arc<MemoryRecordStore>,
        orchestrator: PublishOrchestrator,
    }

    fn fixture() -> Fixture {
        let content = Arc::new(MemoryContentSource::new());
        let remote = Arc::new(MemoryRemote::new());
        let records = Arc::new(MemoryRecordStore::new());
        let config = QuireConfig {
            publish_delay_ms: 0,
            ..QuireConfig::default()
        };
        let orchestrator =
            PublishOrchestrator::new(content.clone(), remote.clone(), records.clone(), config);
        Fixture {
            content,
            remote,
            records,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn update_uses_existing_remote_version_as_precondition() {
        let f = fixture();
        let item = f.content.put("notes/a.md", "one");
        let existing = f.remote.set("content/notes/a.md", "old remote copy");

        let result = f.orchestrator.publish_batch(&[item], None).await.unwrap();
        assert_eq!(result.succeeded, 1);

        let put = f
            .remote
            .calls()
            .into_iter()
            .find_map(|c| match c {
                RemoteCall::Put {
                    precondition,
                    message,
                    ..
                } => Some((precondition, message)),
                _ => None,
            })
            .expect("put call");
        assert_eq!(put.0, Some(existing));
        assert_eq!(put.1, "quire: update notes/a.md");
    }

    #[tokio::test]
    async fn not_found_lookup_is_treated_as_create() {
        let f = fixture();
        let item = f.content.put("notes/a.md", "one");
        f.remote.fail(
            RemoteOp::Get,
            "content/notes/a.md",
            RemoteError::NotFound {
                path: "content/notes/a.md".into(),
            },
        );
        let result = f.orchestrator.publish_batch(&[item], None).await.unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(f.remote.content("content/notes/a.md"), Some(b"one".to_vec()));
    }

    #[tokio::test]
    async fn empty_batches_are_rejected() {
        let f = fixture();
        assert!(matches!(
            f.orchestrator.publish_batch(&[], None).await,
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            f.orchestrator.unpublish_batch(&[]).await,
            Err(SyncError::Validation(_))
        ));
        assert!(!f.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn attachments_are_uploaded_recorded_and_removed() {
        let f = fixture();
        let item = f.content.put("notes/a.md", "body");
        f.content.attach("notes/a.md", "pic.png", "PNG");

        let result = f.orchestrator.publish_batch(&[item.clone()], None).await.unwrap();
        let record = result.items[0].outcome.as_ref().expect("published").clone();
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].remote_path, "content/attachments/notes/a/pic.png");
        assert!(f.remote.content("content/attachments/notes/a/pic.png").is_some());

        let results = f.orchestrator.unpublish_batch(&[item]).await.unwrap();
        assert!(results[0].succeeded);
        assert!(f.remote.paths().is_empty());
        assert!(f.records.get_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_stem_notes_keep_separate_attachments() {
        let f = fixture();
        let first = f.content.put("notes/a.md", "first");
        let second = f.content.put("other/a.md", "second");
        f.content.attach("notes/a.md", "pic.png", "PIC-NOTES");
        f.content.attach("other/a.md", "pic.png", "PIC-OTHER");

        let result = f
            .orchestrator
            .publish_batch(&[first.clone(), second], None)
            .await
            .unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(
            f.remote.content("content/attachments/notes/a/pic.png"),
            Some(b"PIC-NOTES".to_vec())
        );
        assert_eq!(
            f.remote.content("content/attachments/other/a/pic.png"),
            Some(b"PIC-OTHER".to_vec())
        );

        let other = f.records.get("other/a.md").unwrap().expect("record");
        assert_eq!(
            Some(other.attachments[0].remote_sha.clone()),
            f.remote.version("content/attachments/other/a/pic.png")
        );

        let results = f.orchestrator.unpublish_batch(&[first]).await.unwrap();
        assert!(results[0].succeeded);
        assert!(f.remote.content("content/attachments/notes/a/pic.png").is_none());
        assert_eq!(
            f.remote.content("content/attachments/other/a/pic.png"),
            Some(b"PIC-OTHER".to_vec())
        );
    }

    #[tokio::test]
    async fn unreadable_record_store_fails_the_item_before_writing() {
        let content = Arc::new(MemoryContentSource::new());
        let remote = Arc::new(MemoryRemote::new());
        let orchestrator = PublishOrchestrator::new(
            content.clone(),
            remote.clone(),
            Arc::new(UnreadableStore),
            QuireConfig {
                publish_delay_ms: 0,
                ..QuireConfig::default()
            },
        );
        let item = content.put("notes/a.md", "body");

        let result = orchestrator.publish_batch(&[item], None).await.unwrap();
        assert_eq!((result.succeeded, result.failed), (0, 1));
        assert!(matches!(
            result.items[0].outcome,
            Err(SyncError::Store(StoreError::Poisoned))
        ));
        assert!(remote.paths().is_empty());
    }

    #[tokio::test]
    async fn attachment_failure_does_not_fail_the_item() {
        let f = fixture();
        let item = f.content.put("notes/a.md", "body");
        f.content.attach("notes/a.md", "pic.png", "PNG");
        f.remote.fail(
            RemoteOp::Put,
            "content/attachments/notes/a/pic.png",
            RemoteError::Network("reset".into()),
        );

        let result = f.orchestrator.publish_batch(&[item], None).await.unwrap();
        assert_eq!(result.succeeded, 1);
        let record = f.records.get("notes/a.md").unwrap().expect("record");
        assert!(record.attachments.is_empty());
    }

    #[tokio::test]
    async fn unpublish_treats_missing_remote_copy_as_done() {
        let f = fixture();
        let item = f.content.put("notes/a.md", "body");
        f.orchestrator.publish_batch(&[item.clone()], None).await.unwrap();
        f.remote.unset("content/notes/a.md");

        let results = f.orchestrator.unpublish_batch(&[item]).await.unwrap();
        assert!(results[0].succeeded);
        assert!(f.records.get("notes/a.md").unwrap().is_none());
    }

    #[tokio::test]
    async fn unpublish_conflict_keeps_the_record() {
        let f = fixture();
        let item = f.content.put("notes/a.md", "body");
        f.orchestrator.publish_batch(&[item.clone()], None).await.unwrap();
        f.remote.set("content/notes/a.md", "edited on the remote");

        let results = f.orchestrator.unpublish_batch(&[item]).await.unwrap();
        assert!(!results[0].succeeded);
        assert!(results[0].error.as_ref().is_some_and(|e| e.is_conflict()));
        assert!(f.records.get("notes/a.md").unwrap().is_some());
    }

    #[tokio::test]
    async fn held_record_lock_fails_only_that_item() {
        let f = fixture();
        let locks = RecordLocks::new();
        let orchestrator = PublishOrchestrator::new(
            f.content.clone(),
            f.remote.clone(),
            f.records.clone(),
            QuireConfig {
                publish_delay_ms: 0,
                ..QuireConfig::default()
            },
        )
        .with_locks(locks.clone());
        let a = f.content.put("a.md", "a");
        let b = f.content.put("b.md", "b");

        let held = locks.try_acquire("a.md").expect("lock");
        let result = orchestrator.publish_batch(&[a, b], None).await.unwrap();
        drop(held);

        assert_eq!((result.succeeded, result.failed), (1, 1));
        assert!(matches!(
            result.items[0].outcome,
            Err(SyncError::ItemLocked { .. })
        ));
        assert!(!locks.is_held("b.md"));
    }
}
