//! Remote repository abstraction.
//!
//! The core never speaks HTTP. Everything it needs from the remote host is
//! expressed by [`RemoteRepository`]: a tree listing, object reads, and
//! writes/deletes guarded by a version precondition. A write whose
//! precondition no longer matches must fail with [`RemoteError::Conflict`];
//! the core relies on that to avoid lost updates.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::RemoteError;
use crate::hashing::{blob_version, content_hash};
use crate::types::{RemoteFileInfo, RemoteKind, RemoteObject};

#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Full recursive listing of the repository.
    async fn list_tree(&self) -> Result<Vec<RemoteFileInfo>, RemoteError>;

    /// Current content and version at `path`, or `None` if absent.
    async fn get_object(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError>;

    /// Create or replace `path`. With `precondition = Some(v)` the write only
    /// succeeds if the current version is `v`; with `None` only if the path
    /// is absent. Returns the new version.
    async fn put_object(
        &self,
        path: &str,
        bytes: &[u8],
        message: &str,
        precondition: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Delete `path` if its current version is `version`.
    async fn delete_object(&self, path: &str, version: &str, message: &str)
        -> Result<(), RemoteError>;
}

fn check_precondition(
    path: &str,
    precondition: Option<&str>,
    current: Option<&str>,
) -> Result<(), RemoteError> {
    if precondition == current {
        return Ok(());
    }
    Err(RemoteError::Conflict {
        path: path.to_string(),
        expected: precondition.map(str::to_string),
        actual: current.map(str::to_string),
    })
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Operations recorded by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ListTree,
    Get {
        path: String,
    },
    Put {
        path: String,
        message: String,
        precondition: Option<String>,
    },
    Delete {
        path: String,
        version: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Get,
    Put,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    version: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    next_version: u64,
    calls: Vec<RemoteCall>,
    failures: HashMap<(RemoteOp, String), RemoteError>,
}

impl MemoryState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        format!("v{}", self.next_version)
    }

    fn injected(&self, op: RemoteOp, path: &str) -> Result<(), RemoteError> {
        match self.failures.get(&(op, path.to_string())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory remote with real CAS semantics.
///
/// Versions are `v1`, `v2`, ... in write order, so every successful write
/// yields a fresh version. Failures can be injected per operation and path
/// (the empty path targets `list_tree`), and every call is recorded.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Write out-of-band (as another client would), bypassing preconditions.
    pub fn set(&self, path: &str, bytes: impl Into<Vec<u8>>) -> String {
        let mut state = self.lock();
        let version = state.bump();
        state.objects.insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.into(),
                version: version.clone(),
            },
        );
        version
    }

    /// Delete out-of-band.
    pub fn unset(&self, path: &str) {
        self.lock().objects.remove(path);
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(path).map(|o| o.bytes.clone())
    }

    pub fn version(&self, path: &str) -> Option<String> {
        self.lock().objects.get(path).map(|o| o.version.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Make every `op` on `path` fail with `err` until cleared.
    pub fn fail(&self, op: RemoteOp, path: &str, err: RemoteError) {
        self.lock().failures.insert((op, path.to_string()), err);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl RemoteRepository for MemoryRemote {
    async fn list_tree(&self) -> Result<Vec<RemoteFileInfo>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::ListTree);
        state.injected(RemoteOp::List, "")?;
        Ok(state
            .objects
            .iter()
            .map(|(path, obj)| RemoteFileInfo {
                path: path.clone(),
                sha: obj.version.clone(),
                size: obj.bytes.len() as u64,
                kind: RemoteKind::Blob,
            })
            .collect())
    }

    async fn get_object(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Get {
            path: path.to_string(),
        });
        state.injected(RemoteOp::Get, path)?;
        Ok(state.objects.get(path).map(|o| RemoteObject {
            bytes: o.bytes.clone(),
            version: o.version.clone(),
        }))
    }

    async fn put_object(
        &self,
        path: &str,
        bytes: &[u8],
        message: &str,
        precondition: Option<&str>,
    ) -> Result<String, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Put {
            path: path.to_string(),
            message: message.to_string(),
            precondition: precondition.map(str::to_string),
        });
        state.injected(RemoteOp::Put, path)?;
        let current = state.objects.get(path).map(|o| o.version.clone());
        check_precondition(path, precondition, current.as_deref())?;

        let version = state.bump();
        state.objects.insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn delete_object(
        &self,
        path: &str,
        version: &str,
        message: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Delete {
            path: path.to_string(),
            version: version.to_string(),
            message: message.to_string(),
        });
        state.injected(RemoteOp::Delete, path)?;
        let Some(current) = state.objects.get(path).map(|o| o.version.clone()) else {
            return Err(RemoteError::NotFound {
                path: path.to_string(),
            });
        };
        check_precondition(path, Some(version), Some(current.as_str()))?;
        state.objects.remove(path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Name of the append-only write log kept at the directory root.
pub const DIR_REMOTE_LOG: &str = ".quire-history";

/// A local directory acting as the remote repository.
///
/// Object versions are [`blob_version`] digests of the stored bytes.
/// Writes go through a `.tmp` sibling and a rename; each accepted write or
/// delete appends its message to [`DIR_REMOTE_LOG`]. Hidden entries are
/// not part of the listing.
#[derive(Debug)]
pub struct DirRemote {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, RemoteError> {
        let mut out = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." || segment == "." || segment.starts_with('.') {
                return Err(RemoteError::Backend(format!("invalid remote path: {path}")));
            }
            out.push(segment);
        }
        if out == self.root {
            return Err(RemoteError::Backend(format!("invalid remote path: {path}")));
        }
        Ok(out)
    }

    fn read(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let full = self.resolve(path)?;
        match std::fs::read(&full) {
            Ok(bytes) => {
                let version = blob_version(&bytes);
                Ok(Some(RemoteObject { bytes, version }))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(backend(&full, err)),
        }
    }

    fn append_log(&self, op: &str, path: &str, message: &str) {
        use std::io::Write;

        let log = self.root.join(DIR_REMOTE_LOG);
        let line = format!("{}\t{op}\t{path}\t{message}\n", Utc::now().to_rfc3339());
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(err) = result {
            tracing::warn!(path = %log.display(), error = %err, "failed to append remote history");
        }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<RemoteFileInfo>) -> Result<String, RemoteError> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| backend(dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut child_digests = Vec::new();
        for entry in entries {
            let path = entry.path();
            let key = self.key_for(&path);
            let file_type = entry.file_type().map_err(|e| backend(&path, e))?;
            if file_type.is_dir() {
                let index = out.len();
                out.push(RemoteFileInfo {
                    path: key,
                    sha: String::new(),
                    size: 0,
                    kind: RemoteKind::Tree,
                });
                let digest = self.walk(&path, out)?;
                out[index].sha = digest.clone();
                child_digests.push(digest);
            } else if file_type.is_file() {
                let bytes = std::fs::read(&path).map_err(|e| backend(&path, e))?;
                let sha = blob_version(&bytes);
                child_digests.push(sha.clone());
                out.push(RemoteFileInfo {
                    path: key,
                    sha,
                    size: bytes.len() as u64,
                    kind: RemoteKind::Blob,
                });
            }
        }
        Ok(content_hash(child_digests.join("\n").as_bytes()))
    }

    fn key_for(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn backend(path: &Path, err: std::io::Error) -> RemoteError {
    RemoteError::Backend(format!("{}: {err}", path.display()))
}

#[async_trait]
impl RemoteRepository for DirRemote {
    async fn list_tree(&self) -> Result<Vec<RemoteFileInfo>, RemoteError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        self.walk(&self.root, &mut out)?;
        Ok(out)
    }

    async fn get_object(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        self.read(path)
    }

    async fn put_object(
        &self,
        path: &str,
        bytes: &[u8],
        message: &str,
        precondition: Option<&str>,
    ) -> Result<String, RemoteError> {
        let _guard = self.lock_writes();
        let current = self.read(path)?.map(|o| o.version);
        check_precondition(path, precondition, current.as_deref())?;

        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| backend(parent, e))?;
        }
        let tmp = PathBuf::from(format!("{}.quire.tmp", full.display()));
        std::fs::write(&tmp, bytes).map_err(|e| backend(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &full) {
            let _ = std::fs::remove_file(&tmp);
            return Err(backend(&full, e));
        }
        self.append_log("put", path, message);
        Ok(blob_version(bytes))
    }

    async fn delete_object(
        &self,
        path: &str,
        version: &str,
        message: &str,
    ) -> Result<(), RemoteError> {
        let _guard = self.lock_writes();
        let Some(current) = self.read(path)? else {
            return Err(RemoteError::NotFound {
                path: path.to_string(),
            });
        };
        check_precondition(path, Some(version), Some(current.version.as_str()))?;

        let full = self.resolve(path)?;
        std::fs::remove_file(&full).map_err(|e| backend(&full, e))?;
        self.append_log("delete", path, message);
        Ok(())
    }
}
