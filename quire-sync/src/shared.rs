//! Compare-and-swap writes to a single shared remote resource (the site
//! configuration file).
//!
//! ```text
//! Idle ─save─▶ Fetching ─match─▶ Writing ─ok─▶ Done
//!                 │                 │
//!                 └────mismatch─────┴──▶ ConflictDetected
//! ```
//!
//! A conflict is always handed back to the caller as
//! [`SaveOutcome::Conflict`]; nothing here retries past a version mismatch.
//! The caller picks a [`ConflictResolution`] and passes it to
//! [`OptimisticConcurrencyWriter::resolve`].

use std::sync::{Arc, Mutex};

use quire_core::{QuireConfig, RemoteError, RemoteObject, RemoteRepository};

use crate::remote_cache::RemoteSyncCache;
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Fetching,
    Writing,
    Done,
    ConflictDetected,
}

/// What the remote held when a save was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub path: String,
    /// Version the caller believed was current.
    pub baseline: Option<String>,
    /// Version actually found; `None` when the resource is gone.
    pub remote_version: Option<String>,
    pub remote_content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version: String },
    Conflict(ConflictInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Drop the local edit and restart from the remote copy.
    Reload,
    /// Write again using the conflicting remote version as precondition.
    ForceOverwrite,
    /// Touch nothing.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Saved {
        version: String,
    },
    Reloaded {
        content: Option<Vec<u8>>,
        version: Option<String>,
    },
    /// The remote moved again while force-overwriting.
    Conflict(ConflictInfo),
    Cancelled,
}

pub struct OptimisticConcurrencyWriter {
    remote: Arc<dyn RemoteRepository>,
    path: String,
    commit_prefix: String,
    cache: Option<Arc<RemoteSyncCache>>,
    state: Mutex<WriterState>,
}

impl OptimisticConcurrencyWriter {
    /// Writer for the configured shared resource path.
    pub fn new(remote: Arc<dyn RemoteRepository>, config: &QuireConfig) -> Self {
        Self::for_path(remote, &config.shared_resource_path, config)
    }

    pub fn for_path(remote: Arc<dyn RemoteRepository>, path: &str, config: &QuireConfig) -> Self {
        Self {
            remote,
            path: path.to_string(),
            commit_prefix: config.commit_prefix.clone(),
            cache: None,
            state: Mutex::new(WriterState::Idle),
        }
    }

    /// Invalidate `cache` after every successful write.
    pub fn with_cache(mut self, cache: Arc<RemoteSyncCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> WriterState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: WriterState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
        tracing::debug!(path = %self.path, ?state, "shared resource writer state");
    }

    /// Current remote content and version, `None` when absent.
    pub async fn load(&self) -> Result<Option<RemoteObject>, SyncError> {
        match self.remote.get_object(&self.path).await {
            Ok(object) => Ok(object),
            Err(RemoteError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write `new_value` if the remote is still at `baseline`.
    ///
    /// `baseline == None` means the caller expects the resource not to
    /// exist yet.
    pub async fn save(
        &self,
        new_value: &[u8],
        baseline: Option<&str>,
        description: &str,
    ) -> Result<SaveOutcome, SyncError> {
        self.set_state(WriterState::Fetching);
        let current = match self.load().await {
            Ok(current) => current,
            Err(err) => {
                self.set_state(WriterState::Idle);
                return Err(err);
            }
        };

        let current_version = current.as_ref().map(|o| o.version.as_str());
        if current_version != baseline {
            tracing::info!(
                path = %self.path,
                baseline = baseline.unwrap_or("<none>"),
                remote = current_version.unwrap_or("<none>"),
                "shared resource changed remotely"
            );
            self.set_state(WriterState::ConflictDetected);
            return Ok(SaveOutcome::Conflict(ConflictInfo {
                path: self.path.clone(),
                baseline: baseline.map(str::to_string),
                remote_version: current.as_ref().map(|o| o.version.clone()),
                remote_content: current.map(|o| o.bytes),
            }));
        }

        self.write(new_value, baseline, description).await
    }

    /// Apply the caller's decision to a conflict returned by [`save`](Self::save).
    pub async fn resolve(
        &self,
        conflict: &ConflictInfo,
        resolution: ConflictResolution,
        new_value: &[u8],
        description: &str,
    ) -> Result<ResolveOutcome, SyncError> {
        match resolution {
            ConflictResolution::Cancel => {
                tracing::info!(path = %self.path, "conflict resolution cancelled");
                self.set_state(WriterState::Idle);
                Ok(ResolveOutcome::Cancelled)
            }
            ConflictResolution::Reload => {
                self.set_state(WriterState::Fetching);
                let current = self.load().await;
                self.set_state(WriterState::Idle);
                let current = current?;
                Ok(ResolveOutcome::Reloaded {
                    version: current.as_ref().map(|o| o.version.clone()),
                    content: current.map(|o| o.bytes),
                })
            }
            ConflictResolution::ForceOverwrite => {
                tracing::warn!(
                    path = %self.path,
                    over = conflict.remote_version.as_deref().unwrap_or("<none>"),
                    "overwriting remote change"
                );
                let outcome = self
                    .write(new_value, conflict.remote_version.as_deref(), description)
                    .await?;
                Ok(match outcome {
                    SaveOutcome::Saved { version } => ResolveOutcome::Saved { version },
                    SaveOutcome::Conflict(info) => ResolveOutcome::Conflict(info),
                })
            }
        }
    }

    async fn write(
        &self,
        new_value: &[u8],
        precondition: Option<&str>,
        description: &str,
    ) -> Result<SaveOutcome, SyncError> {
        self.set_state(WriterState::Writing);
        let message = format!("{}: {description}", self.commit_prefix);
        match self
            .remote
            .put_object(&self.path, new_value, &message, precondition)
            .await
        {
            Ok(version) => {
                if let Some(cache) = &self.cache {
                    cache.invalidate();
                }
                self.set_state(WriterState::Done);
                tracing::info!(path = %self.path, version = %version, "shared resource saved");
                Ok(SaveOutcome::Saved { version })
            }
            Err(RemoteError::Conflict { actual, .. }) => {
                // Lost a race between the version check and the write.
                self.set_state(WriterState::ConflictDetected);
                let latest = self.load().await.ok().flatten();
                Ok(SaveOutcome::Conflict(ConflictInfo {
                    path: self.path.clone(),
                    baseline: precondition.map(str::to_string),
                    remote_version: latest.as_ref().map(|o| o.version.clone()).or(actual),
                    remote_content: latest.map(|o| o.bytes),
                }))
            }
            Err(err) => {
                self.set_state(WriterState::Idle);
                Err(err.into())
            }
        }
    }
}

/// Local editing state for the shared resource.
///
/// Holds the baseline version the edit started from and moves it forward
/// on every successful save or reload, so the next save carries the right
/// precondition.
pub struct EditSession<'a> {
    writer: &'a OptimisticConcurrencyWriter,
    baseline: Option<String>,
    content: Vec<u8>,
}

impl<'a> EditSession<'a> {
    /// Start editing from the current remote copy.
    pub async fn open(writer: &'a OptimisticConcurrencyWriter) -> Result<Self, SyncError> {
        let current = writer.load().await?;
        Ok(Self {
            writer,
            baseline: current.as_ref().map(|o| o.version.clone()),
            content: current.map(|o| o.bytes).unwrap_or_default(),
        })
    }

    /// Start from a baseline obtained elsewhere.
    pub fn with_baseline(
        writer: &'a OptimisticConcurrencyWriter,
        baseline: Option<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            writer,
            baseline,
            content,
        }
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub async fn save(
        &mut self,
        new_value: Vec<u8>,
        description: &str,
    ) -> Result<SaveOutcome, SyncError> {
        let outcome = self
            .writer
            .save(&new_value, self.baseline.as_deref(), description)
            .await?;
        if let SaveOutcome::Saved { version } = &outcome {
            self.baseline = Some(version.clone());
            self.content = new_value;
        }
        Ok(outcome)
    }

    pub async fn resolve(
        &mut self,
        conflict: &ConflictInfo,
        resolution: ConflictResolution,
        new_value: Vec<u8>,
        description: &str,
    ) -> Result<ResolveOutcome, SyncError> {
        let outcome = self
            .writer
            .resolve(conflict, resolution, &new_value, description)
            .await?;
        match &outcome {
            ResolveOutcome::Saved { version } => {
                self.baseline = Some(version.clone());
                self.content = new_value;
            }
            ResolveOutcome::Reloaded { content, version } => {
                self.baseline = version.clone();
                self.content = content.clone().unwrap_or_default();
            }
            ResolveOutcome::Conflict(_) | ResolveOutcome::Cancelled => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{
        remote::{RemoteCall, RemoteOp},
        MemoryRemote,
    };

    const PATH: &str = "_config.yml";

    fn writer(remote: &Arc<MemoryRemote>) -> OptimisticConcurrencyWriter {
        OptimisticConcurrencyWriter::new(remote.clone(), &QuireConfig::default())
    }

    #[tokio::test]
    async fn save_at_current_version_then_stale_baseline_conflicts() {
        let remote = Arc::new(MemoryRemote::new());
        let v1 = remote.set(PATH, "title: a");
        let writer = writer(&remote);

        let saved = writer.save(b"title: b", Some(v1.as_str()), "update").await.unwrap();
        let SaveOutcome::Saved { version } = saved else {
            panic!("expected save, got {saved:?}");
        };
        assert_ne!(version, v1);
        assert_eq!(writer.state(), WriterState::Done);

        let again = writer.save(b"title: c", Some(v1.as_str()), "update").await.unwrap();
        assert!(matches!(again, SaveOutcome::Conflict(_)));
        assert_eq!(writer.state(), WriterState::ConflictDetected);
        assert_eq!(remote.content(PATH), Some(b"title: b".to_vec()));
    }

    #[tokio::test]
    async fn force_overwrite_uses_the_conflicting_version() {
        let remote = Arc::new(MemoryRemote::new());
        let v1 = remote.set(PATH, "one");
        let v2 = remote.set(PATH, "two");
        assert_eq!((v1.as_str(), v2.as_str()), ("v1", "v2"));
        let writer = writer(&remote);

        let SaveOutcome::Conflict(conflict) =
            writer.save(b"mine", Some("v1"), "update").await.unwrap()
        else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.remote_version.as_deref(), Some("v2"));
        assert_eq!(conflict.remote_content.as_deref(), Some(&b"two"[..]));

        let resolved = writer
            .resolve(&conflict, ConflictResolution::ForceOverwrite, b"mine", "update")
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolveOutcome::Saved {
                version: "v3".into()
            }
        );

        let last_put = remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Put { precondition, .. } => Some(precondition),
                _ => None,
            })
            .last();
        assert_eq!(last_put, Some(Some("v2".to_string())));
    }

    #[tokio::test]
    async fn reload_and_cancel_do_not_write() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set(PATH, "one");
        let v2 = remote.set(PATH, "two");
        let writer = writer(&remote);

        let SaveOutcome::Conflict(conflict) =
            writer.save(b"mine", Some("v1"), "update").await.unwrap()
        else {
            panic!("expected conflict");
        };

        let reloaded = writer
            .resolve(&conflict, ConflictResolution::Reload, b"mine", "update")
            .await
            .unwrap();
        assert_eq!(
            reloaded,
            ResolveOutcome::Reloaded {
                content: Some(b"two".to_vec()),
                version: Some(v2.clone()),
            }
        );

        let cancelled = writer
            .resolve(&conflict, ConflictResolution::Cancel, b"mine", "update")
            .await
            .unwrap();
        assert_eq!(cancelled, ResolveOutcome::Cancelled);

        assert!(!remote
            .calls()
            .iter()
            .any(|c| matches!(c, RemoteCall::Put { .. })));
        assert_eq!(remote.version(PATH), Some(v2));
    }

    #[tokio::test]
    async fn racing_write_surfaces_as_conflict() {
        let remote = Arc::new(MemoryRemote::new());
        let v1 = remote.set(PATH, "one");
        remote.fail(
            RemoteOp::Put,
            PATH,
            RemoteError::Conflict {
                path: PATH.into(),
                expected: Some(v1.clone()),
                actual: Some("v9".into()),
            },
        );
        let writer = writer(&remote);

        let outcome = writer.save(b"two", Some(v1.as_str()), "update").await.unwrap();
        let SaveOutcome::Conflict(info) = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(info.baseline, Some(v1));
    }

    #[tokio::test]
    async fn network_failure_is_an_error_and_resets_state() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail(RemoteOp::Get, PATH, RemoteError::Network("down".into()));
        let writer = writer(&remote);

        let err = writer.save(b"x", None, "create").await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Network(_))));
        assert_eq!(writer.state(), WriterState::Idle);
    }

    #[tokio::test]
    async fn edit_session_tracks_baseline() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set(PATH, "one");
        let writer = writer(&remote);

        let mut session = EditSession::open(&writer).await.unwrap();
        assert_eq!(session.baseline(), Some("v1"));

        session.save(b"two".to_vec(), "update").await.unwrap();
        assert_eq!(session.baseline(), Some("v2"));
        session.save(b"three".to_vec(), "update").await.unwrap();
        assert_eq!(session.baseline(), Some("v3"));
        assert_eq!(session.content(), b"three");

        remote.set(PATH, "theirs");
        let SaveOutcome::Conflict(conflict) =
            session.save(b"four".to_vec(), "update").await.unwrap()
        else {
            panic!("expected conflict");
        };
        session
            .resolve(&conflict, ConflictResolution::Reload, b"four".to_vec(), "update")
            .await
            .unwrap();
        assert_eq!(session.baseline(), Some("v4"));
        assert_eq!(session.content(), b"theirs");
    }
}
