//! Structured error types for the configuration engine.
//!
//! Environmental failures (I/O, permissions, malformed files) are normally
//! absorbed and logged by the store and the resolvers. The variants that
//! callers actually see are programmer errors such as an empty reference
//! schema or a non-mapping argument to a merge.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory is not writable and the configuration file does not exist.
    #[error("permission denied: cannot create {0}")]
    PermissionDenied(PathBuf),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reconciliation against an empty schema would wipe the document.
    #[error("reference mapping is empty; refusing to reconcile keys")]
    EmptyReference,

    #[error("expected a mapping for {what}")]
    NotAMapping { what: &'static str },

    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document has no backing file.
    #[error("document '{0}' is detached from disk")]
    Detached(String),
}

impl ConfigError {
    /// Wrap an I/O error, promoting `PermissionDenied` to its own variant.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied(path);
        }
        Self::Io { path, source }
    }

    /// Whether this error came from the environment rather than a caller bug.
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::PermissionDenied(_) | Self::Lock { .. } | Self::Detached(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
