//! Record store wrapper that notifies observers after every mutation.
//!
//! Registering the [`RemoteSyncCache`](crate::remote_cache::RemoteSyncCache)
//! as an observer turns "invalidate after a write" from a caller duty into
//! a side effect of the write itself.

use std::sync::Arc;

use quire_core::{PublishRecord, RecordMap, RecordStore, StoreError};

/// Notified after a record was created, replaced, or removed.
pub trait RecordObserver: Send + Sync {
    fn records_changed(&self, key: &str);
}

pub struct ObservedRecordStore {
    inner: Arc<dyn RecordStore>,
    observers: Vec<Arc<dyn RecordObserver>>,
}

impl ObservedRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RecordObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn notify(&self, key: &str) {
        for observer in &self.observers {
            observer.records_changed(key);
        }
    }
}

impl RecordStore for ObservedRecordStore {
    fn get_all(&self) -> Result<RecordMap, StoreError> {
        self.inner.get_all()
    }

    fn get(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        self.inner.get(key)
    }

    fn upsert(&self, key: &str, record: PublishRecord) -> Result<(), StoreError> {
        self.inner.upsert(key, record)?;
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<PublishRecord>, StoreError> {
        let removed = self.inner.remove(key)?;
        if removed.is_some() {
            self.notify(key);
        }
        Ok(removed)
    }
}
