//! Time-bounded snapshot of the remote listing.
//!
//! One snapshot per content root, filtered to managed files (blobs under
//! `<content_root>/` with the managed extension). Snapshots are replaced
//! wholesale and never patched.
//!
//! Validity is checked by the reader, never refreshed automatically. Any
//! write to the remote must be followed by [`RemoteSyncCache::invalidate`]
//! before the next status computation; wrapping the record store in an
//! [`ObservedRecordStore`](crate::observed::ObservedRecordStore) does that
//! for publish and unpublish.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};

use quire_core::{
    ProgressFn, Progress, QuireConfig, RemoteError, RemoteFileInfo, RemoteKind, RemoteRepository,
};

use crate::observed::RecordObserver;

/// Filtered remote listing captured at `fetched_at`.
///
/// `valid_until == fetched_at + validity window` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub files: Vec<RemoteFileInfo>,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    paths: BTreeSet<String>,
}

impl RemoteSnapshot {
    pub fn new(files: Vec<RemoteFileInfo>, fetched_at: DateTime<Utc>, validity: Duration) -> Self {
        let paths = files.iter().map(|f| f.path.clone()).collect();
        Self {
            files,
            fetched_at,
            valid_until: fetched_at + validity,
            paths,
        }
    }

    /// `now - fetched_at < validity`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }

    pub fn contains(&self, remote_path: &str) -> bool {
        self.paths.contains(remote_path)
    }

    pub fn get(&self, remote_path: &str) -> Option<&RemoteFileInfo> {
        self.files.iter().find(|f| f.path == remote_path)
    }
}

/// Result of [`RemoteSyncCache::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub files: Vec<RemoteFileInfo>,
    pub success: bool,
    pub error: Option<RemoteError>,
}

pub struct RemoteSyncCache {
    remote: Arc<dyn RemoteRepository>,
    content_root: String,
    extension: String,
    validity: Duration,
    snapshot: RwLock<Option<Arc<RemoteSnapshot>>>,
}

impl std::fmt::Debug for RemoteSyncCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncCache")
            .field("content_root", &self.content_root)
            .field("extension", &self.extension)
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl RemoteSyncCache {
    pub fn new(remote: Arc<dyn RemoteRepository>, config: &QuireConfig) -> Self {
        Self {
            remote,
            content_root: config.content_root.trim_matches('/').to_string(),
            extension: config.extension().to_string(),
            validity: config.cache_validity(),
            snapshot: RwLock::new(None),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// List the remote once, keep the managed files, and install them as the
    /// new snapshot. A failed listing leaves the previous snapshot in place.
    pub async fn fetch(&self, on_progress: Option<&ProgressFn>) -> FetchOutcome {
        report(on_progress, 0);
        let listing = match self.remote.list_tree().await {
            Ok(listing) => listing,
            Err(err) => {
                tracing::warn!(error = %err, "remote listing failed");
                return FetchOutcome {
                    files: Vec::new(),
                    success: false,
                    error: Some(err),
                };
            }
        };

        let total = listing.len();
        let files: Vec<RemoteFileInfo> = listing
            .into_iter()
            .filter(|f| self.is_managed(f))
            .collect();
        tracing::debug!(
            listed = total,
            managed = files.len(),
            root = %self.content_root,
            "fetched remote listing"
        );

        let snapshot = RemoteSnapshot::new(files.clone(), Utc::now(), self.validity);
        *self.write() = Some(Arc::new(snapshot));
        report(on_progress, 1);

        FetchOutcome {
            files,
            success: true,
            error: None,
        }
    }

    fn is_managed(&self, file: &RemoteFileInfo) -> bool {
        if file.kind != RemoteKind::Blob {
            return false;
        }
        let Some(rest) = file
            .path
            .strip_prefix(self.content_root.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            return false;
        };
        rest.rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext == self.extension)
    }

    /// Current snapshot regardless of age.
    pub fn snapshot(&self) -> Option<Arc<RemoteSnapshot>> {
        self.read().clone()
    }

    /// Current snapshot if it is still valid.
    pub fn valid_snapshot(&self) -> Option<Arc<RemoteSnapshot>> {
        self.snapshot().filter(|s| self.is_valid(s))
    }

    pub fn is_valid(&self, snapshot: &RemoteSnapshot) -> bool {
        snapshot.is_valid_at(Utc::now())
    }

    /// Install a snapshot obtained elsewhere.
    pub fn replace(&self, snapshot: RemoteSnapshot) {
        *self.write() = Some(Arc::new(snapshot));
    }

    pub fn invalidate(&self) {
        if self.write().take().is_some() {
            tracing::debug!(root = %self.content_root, "remote listing cache invalidated");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Arc<RemoteSnapshot>>> {
        self.snapshot.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Arc<RemoteSnapshot>>> {
        self.snapshot.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl RecordObserver for RemoteSyncCache {
    fn records_changed(&self, _key: &str) {
        self.invalidate();
    }
}

fn report(on_progress: Option<&ProgressFn>, processed: usize) {
    if let Some(cb) = on_progress {
        cb(Progress {
            processed,
            total: 1,
        });
    }
}
