//! Quire core library — domain types, collaborator seams, stores, errors.
//!
//! - [`types`] — items, records, remote listing entries, statuses
//! - [`error`] — [`RemoteError`], [`StoreError`], [`ContentError`], [`ConfigError`]
//! - [`content`] — [`ContentSource`] and its filesystem / in-memory impls
//! - [`remote`] — [`RemoteRepository`] and its directory / in-memory impls
//! - [`records`] — [`RecordStore`] and its JSON-file / in-memory impls
//! - [`config`] — workspace `config.yaml` load / save
//! - [`hashing`] — content digests

pub mod config;
pub mod content;
pub mod error;
pub mod hashing;
pub mod records;
pub mod remote;
pub mod types;

pub use config::QuireConfig;
pub use content::{ContentSource, FsContentSource, MemoryContentSource};
pub use error::{ConfigError, ContentError, RemoteError, StoreError};
pub use records::{JsonRecordStore, MemoryRecordStore, RecordMap, RecordStore};
pub use remote::{DirRemote, MemoryRemote, RemoteRepository};
pub use types::{
    Attachment, AttachmentRecord, ItemStatus, Progress, ProgressFn, PublishRecord,
    PublishableItem, RemoteFileInfo, RemoteKind, RemoteObject,
};
