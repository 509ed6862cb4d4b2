//! # quire-sync
//!
//! Publish-state reconciliation between local content, stored records, and
//! a remote repository.
//!
//! - [`StatusEngine`] classifies items as new / modified / synced / deleted.
//! - [`RemoteSyncCache`] holds a time-bounded remote listing.
//! - [`PublishOrchestrator`] runs publish and unpublish batches.
//! - [`OptimisticConcurrencyWriter`] performs compare-and-swap saves of the
//!   shared site configuration.

pub mod cleanup;
pub mod diff;
pub mod error;
pub mod observed;
pub mod publisher;
pub mod remote_cache;
pub mod shared;
pub mod status;

pub use cleanup::remove_stale_records;
pub use diff::{diff_item, ItemDiff};
pub use error::SyncError;
pub use observed::{ObservedRecordStore, RecordObserver};
pub use publisher::{
    BatchResult, ItemResult, PublishOrchestrator, RecordLocks, UnpublishResult,
};
pub use remote_cache::{FetchOutcome, RemoteSnapshot, RemoteSyncCache};
pub use shared::{
    ConflictInfo, ConflictResolution, EditSession, OptimisticConcurrencyWriter, ResolveOutcome,
    SaveOutcome, WriterState,
};
pub use status::{SkippedItem, StatusEngine, StatusEntry, StatusOverview};
