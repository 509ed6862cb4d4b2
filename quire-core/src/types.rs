//! Domain types shared by every quire crate.
//!
//! Local item paths are `/`-separated strings relative to the notes root,
//! never OS paths: they double as record keys and as the suffix of the
//! remote path, so they must compare identically on every platform.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Local content
// ---------------------------------------------------------------------------

/// One unit of local content eligible for tracking, e.g. a note.
///
/// Identity is the stable local `path`. The bytes are not carried here;
/// they are read on demand through
/// [`ContentSource::read_content`](crate::content::ContentSource::read_content).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishableItem {
    pub id: String,
    pub path: String,
}

impl PublishableItem {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: path.clone(),
            path,
        }
    }
}

impl fmt::Display for PublishableItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

/// A binary or text file that travels with an item (image, PDF, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Remote copy of an attachment uploaded alongside an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub name: String,
    pub remote_path: String,
    pub remote_sha: String,
}

/// Persisted link between a local item and its last published remote copy.
///
/// `content_hash` and `remote_sha` always describe the same write: they are
/// only ever replaced together, after the remote accepted the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: String,
    pub local_path: String,
    pub remote_path: String,
    pub content_hash: String,
    pub remote_sha: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRecord>,
}

impl PublishRecord {
    /// Placeholder item standing in for a record whose local file is gone.
    pub fn placeholder(&self) -> PublishableItem {
        PublishableItem {
            id: self.id.clone(),
            path: self.local_path.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Blob,
    Tree,
}

/// One entry of a remote tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileInfo {
    pub path: String,
    pub sha: String,
    pub size: u64,
    pub kind: RemoteKind,
}

/// Object content as returned by the remote, with its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub bytes: Vec<u8>,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of one item, computed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemStatus {
    New,
    Modified { local_hash: String },
    Synced { local_hash: String },
    PendingDelete,
}

impl ItemStatus {
    pub fn key(&self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Modified { .. } => "modified",
            ItemStatus::Synced { .. } => "synced",
            ItemStatus::PendingDelete => "deleted",
        }
    }
}

/// Progress of a chunked or multi-step operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

/// Progress callback handed to long-running operations.
pub type ProgressFn = dyn Fn(Progress) + Send + Sync;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
