// src/errors.rs

use thiserror::Error;

/// Error taxonomy shared by every ark subsystem.
///
/// Variants map onto error *kinds* rather than call sites: callers match on
/// the kind to decide whether to abort, retry, or log and continue.
#[derive(Error, Debug)]
pub enum ArkError {
    /// Malformed workspace file, unresolved reference, invalid pattern or
    /// missing attribute.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Cycle, unknown address or unknown kind. Fatal at load.
    #[error("Graph error: {0}")]
    GraphError(String),

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Build of {address} failed: {message}")]
    BuildError { address: String, message: String },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Hash error: {0}")]
    HashError(String),

    #[error("Observer error: {0}")]
    ObserverError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Unsafe archive entry: {0}")]
    UnsafeArchive(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArkError {
    pub fn build(address: impl Into<String>, message: impl Into<String>) -> Self {
        ArkError::BuildError {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind tag, used on the sync wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ArkError::ConfigError(_) => "config",
            ArkError::GraphError(_) => "graph",
            ArkError::NotFound(_) => "not_found",
            ArkError::BuildError { .. } => "build",
            ArkError::CacheError(_) => "cache",
            ArkError::HashError(_) => "hash",
            ArkError::ObserverError(_) => "observer",
            ArkError::SyncError(_) => "sync",
            ArkError::UnsafeArchive(_) => "unsafe_archive",
            ArkError::SupervisorError(_) => "supervisor",
            ArkError::Cancelled => "cancelled",
            ArkError::IoError(_) => "io",
            ArkError::TomlError(_) => "config",
            ArkError::JsonError(_) => "sync",
            ArkError::Other(_) => "other",
        }
    }

    /// Rebuild an error from a wire `(kind, message)` pair.
    pub fn from_wire(kind: &str, message: String) -> Self {
        match kind {
            "unsafe_archive" => ArkError::UnsafeArchive(message),
            "supervisor" => ArkError::SupervisorError(message),
            "cancelled" => ArkError::Cancelled,
            _ => ArkError::SyncError(format!("{kind}: {message}")),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ArkError>;
