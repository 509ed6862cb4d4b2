//! Workspace configuration.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   .quire/
//!     config.yaml    (optional — defaults apply when absent)
//!     records.json   (publish records, see `records::JsonRecordStore`)
//! ```
//!
//! Every function takes the workspace `root` explicitly; tests pass a
//! `TempDir`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{config_io_err, ConfigError};

pub const DEFAULT_CONTENT_ROOT: &str = "content";
pub const DEFAULT_EXTENSION: &str = "md";
pub const DEFAULT_CACHE_VALIDITY_SECS: u64 = 5 * 60;
pub const DEFAULT_PUBLISH_DELAY_MS: u64 = 500;
pub const DEFAULT_STATUS_CHUNK_SIZE: usize = 20;
pub const DEFAULT_SHARED_RESOURCE_PATH: &str = "_config.yml";

/// Settings for one quire workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    /// Directory inside the remote repository that holds published items.
    pub content_root: String,
    /// Extension (without dot) of managed content files.
    pub extension: String,
    /// How long a remote listing snapshot stays valid.
    pub cache_validity_secs: u64,
    /// Pause between two items of a publish/unpublish batch.
    pub publish_delay_ms: u64,
    /// Items classified per scheduling slice by the status engine.
    pub status_chunk_size: usize,
    /// Remote path of the shared site configuration resource.
    pub shared_resource_path: String,
    /// Local directory acting as the remote repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_dir: Option<PathBuf>,
    /// Prefix for commit messages sent with remote writes.
    pub commit_prefix: String,
}

impl Default for QuireConfig {
    fn default() -> Self {
        Self {
            content_root: DEFAULT_CONTENT_ROOT.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            cache_validity_secs: DEFAULT_CACHE_VALIDITY_SECS,
            publish_delay_ms: DEFAULT_PUBLISH_DELAY_MS,
            status_chunk_size: DEFAULT_STATUS_CHUNK_SIZE,
            shared_resource_path: DEFAULT_SHARED_RESOURCE_PATH.to_string(),
            remote_dir: None,
            commit_prefix: "quire".to_string(),
        }
    }
}

impl QuireConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "status_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.content_root.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("content_root is empty".to_string()));
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid("extension is empty".to_string()));
        }
        if self.shared_resource_path.is_empty() {
            return Err(ConfigError::Invalid(
                "shared_resource_path is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_validity_secs.min(i64::MAX as u64) as i64)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    /// Extension without a leading dot.
    pub fn extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }

    /// `<content_root>/<local_path>`
    pub fn remote_path_for(&self, local_path: &str) -> String {
        format!(
            "{}/{}",
            self.content_root.trim_matches('/'),
            local_path.trim_start_matches('/')
        )
    }

    /// `<content_root>/attachments/<local_path without extension>/<name>`
    ///
    /// Notes sharing a file stem in different folders get distinct paths.
    pub fn attachment_path_for(&self, local_path: &str, name: &str) -> String {
        let local = local_path.trim_matches('/');
        let file_start = local.rfind('/').map_or(0, |i| i + 1);
        let base = match local[file_start..].rfind('.') {
            Some(dot) if dot > 0 => &local[..file_start + dot],
            _ => local,
        };
        format!(
            "{}/attachments/{}/{}",
            self.content_root.trim_matches('/'),
            base,
            name
        )
    }

    /// `"<prefix>: <action> <path>"`
    pub fn commit_message(&self, action: &str, path: &str) -> String {
        format!("{}: {action} {path}", self.commit_prefix)
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<root>/.quire/`
pub fn quire_dir_at(root: &Path) -> PathBuf {
    root.join(".quire")
}

/// `<root>/.quire/config.yaml`
pub fn config_path_at(root: &Path) -> PathBuf {
    quire_dir_at(root).join("config.yaml")
}

/// `<root>/.quire/records.json`
pub fn records_path_at(root: &Path) -> PathBuf {
    quire_dir_at(root).join("records.json")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the workspace config, falling back to defaults when absent.
pub fn load_at(root: &Path) -> Result<QuireConfig, ConfigError> {
    let path = config_path_at(root);
    if !path.exists() {
        return Ok(QuireConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| config_io_err(&path, e))?;
    let config: QuireConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// Atomically save the workspace config (`.yaml.tmp` sibling → rename).
pub fn save_at(root: &Path, config: &QuireConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let dir = quire_dir_at(root);
    std::fs::create_dir_all(&dir).map_err(|e| config_io_err(&dir, e))?;

    let path = config_path_at(root);
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| config_io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| config_io_err(&path, e))?;
    Ok(())
}
