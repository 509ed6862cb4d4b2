//! Reconcile stored records against a remote listing.

use quire_core::{PublishRecord, RecordStore};

use crate::remote_cache::RemoteSnapshot;
use crate::SyncError;

/// Drop every record whose remote copy is missing from `snapshot`.
///
/// Refuses to run against an expired snapshot: removing records on the
/// strength of an old listing would forget items that are still live.
pub fn remove_stale_records(
    store: &dyn RecordStore,
    snapshot: &RemoteSnapshot,
) -> Result<Vec<PublishRecord>, SyncError> {
    if !snapshot.is_valid_at(chrono::Utc::now()) {
        return Err(SyncError::Validation(
            "remote listing has expired; fetch it again before cleanup".to_string(),
        ));
    }

    let mut removed = Vec::new();
    for (key, record) in store.get_all()? {
        if snapshot.contains(&record.remote_path) {
            continue;
        }
        if let Some(record) = store.remove(&key)? {
            tracing::info!(path = %key, remote = %record.remote_path, "removed stale record");
            removed.push(record);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use quire_core::{MemoryRecordStore, RemoteFileInfo, RemoteKind};

    fn record(path: &str) -> PublishRecord {
        PublishRecord {
            id: path.into(),
            local_path: path.into(),
            remote_path: format!("content/{path}"),
            content_hash: "h".into(),
            remote_sha: "v1".into(),
            published_at: Utc::now(),
            attachments: vec![],
        }
    }

    fn listing(paths: &[&str], fetched_at: chrono::DateTime<Utc>) -> RemoteSnapshot {
        let files = paths
            .iter()
            .map(|p| RemoteFileInfo {
                path: p.to_string(),
                sha: "v1".into(),
                size: 1,
                kind: RemoteKind::Blob,
            })
            .collect();
        RemoteSnapshot::new(files, fetched_at, Duration::minutes(5))
    }

    #[test]
    fn removes_only_records_missing_remotely() {
        let store = MemoryRecordStore::with_records([record("a.md"), record("b.md")]);
        let snapshot = listing(&["content/a.md"], Utc::now());

        let removed = remove_stale_records(&store, &snapshot).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].local_path, "b.md");
        let left: Vec<_> = store.get_all().unwrap().into_keys().collect();
        assert_eq!(left, vec!["a.md"]);
    }

    #[test]
    fn expired_listing_is_refused() {
        let store = MemoryRecordStore::with_records([record("a.md")]);
        let snapshot = listing(&[], Utc::now() - Duration::minutes(6));

        let err = remove_stale_records(&store, &snapshot).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(store.get_all().unwrap().len(), 1);
    }
}
