//! Wires the on-disk adapters together for one notes directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use quire_core::{
    config::{self, quire_dir_at},
    DirRemote, FsContentSource, JsonRecordStore, PublishableItem, QuireConfig,
};
use quire_sync::{
    ObservedRecordStore, OptimisticConcurrencyWriter, PublishOrchestrator, RemoteSyncCache,
    StatusEngine,
};

pub struct Workspace {
    pub root: PathBuf,
    pub config: QuireConfig,
    pub content: Arc<FsContentSource>,
    pub remote: Arc<DirRemote>,
    pub cache: Arc<RemoteSyncCache>,
    pub records: Arc<ObservedRecordStore>,
}

impl Workspace {
    pub fn open(root: &Path, remote_override: Option<&Path>) -> Result<Self> {
        if !root.is_dir() {
            bail!("notes directory '{}' does not exist", root.display());
        }
        let config = config::load_at(root)
            .with_context(|| format!("failed to load config under '{}'", root.display()))?;

        let remote_dir = match remote_override.or(config.remote_dir.as_deref()) {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => root.join(dir),
            None => quire_dir_at(root).join("remote"),
        };
        tracing::debug!(root = %root.display(), remote = %remote_dir.display(), "opening workspace");

        let content = Arc::new(FsContentSource::new(root, config.extension()));
        let remote = Arc::new(DirRemote::new(remote_dir));
        let cache = Arc::new(RemoteSyncCache::new(remote.clone(), &config));
        let store = JsonRecordStore::open_at(root).context("failed to open publish records")?;
        let records =
            Arc::new(ObservedRecordStore::new(Arc::new(store)).with_observer(cache.clone()));

        Ok(Self {
            root: root.to_path_buf(),
            config,
            content,
            remote,
            cache,
            records,
        })
    }

    pub fn status_engine(&self) -> StatusEngine {
        StatusEngine::new(self.content.clone(), self.records.clone(), &self.config)
            .with_cache(self.cache.clone())
    }

    pub fn orchestrator(&self) -> PublishOrchestrator {
        PublishOrchestrator::new(
            self.content.clone(),
            self.remote.clone(),
            self.records.clone(),
            self.config.clone(),
        )
    }

    pub fn site_config_writer(&self) -> OptimisticConcurrencyWriter {
        OptimisticConcurrencyWriter::new(self.remote.clone(), &self.config)
            .with_cache(self.cache.clone())
    }

    /// Item for a user-supplied path relative to the notes directory.
    pub fn item(&self, path: &str) -> PublishableItem {
        let normalized = path.replace('\\', "/");
        PublishableItem::new(normalized.trim_start_matches("./"))
    }
}
