//! Error types for quire-core.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a [`RemoteRepository`](crate::remote::RemoteRepository).
///
/// The taxonomy is transport-agnostic: adapters map their wire-level
/// failures (HTTP status codes, socket errors, ...) onto these variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Transient transport failure. The caller may retry.
    #[error("network error: {0}")]
    Network(String),

    /// The remote host asked the caller to slow down.
    #[error("rate limited by remote{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// No object exists at `path`.
    #[error("remote object not found: {path}")]
    NotFound { path: String },

    /// The version precondition supplied with a write did not match.
    #[error("version conflict at {path}: expected {}, found {}", show(.expected), show(.actual))]
    Conflict {
        path: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Non-transient failure inside the remote backend itself.
    #[error("remote backend error: {0}")]
    Backend(String),
}

impl RemoteError {
    /// `true` for failures the caller may retry after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::RateLimited { .. })
    }
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}

fn show(version: &Option<String>) -> &str {
    version.as_deref().unwrap_or("<none>")
}

/// All errors that can arise from record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("record store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A previous holder of the store lock panicked.
    #[error("record store lock poisoned")]
    Poisoned,
}

/// Errors raised while enumerating or reading local content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("content not found: {path}")]
    NotFound { path: String },

    /// The YAML front matter of a note could not be parsed.
    #[error("invalid front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A front-matter attachment resolves outside the notes root.
    #[error("attachment '{attachment}' of {path} points outside the notes directory")]
    AttachmentOutsideRoot { path: String, attachment: String },
}

/// Errors from loading or saving `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn content_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ContentError {
    ContentError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
