//! Typed error hierarchy for the site-provisioning pipeline.
//!
//! One enum per component:
//! - `SafePathError` — containment check failures (shared by extraction and serving)
//! - `ExtractError` — archive intake failures
//! - `RegistryError` — site metadata and directory failures
//! - `LaunchError` — start-command spawn failures (never fatal to site creation)
//! - `ProvisionError` — a whole upload aborted before the site was registered

use std::path::PathBuf;

use thiserror::Error;

/// Errors from resolving a relative path beneath a root directory.
#[derive(Debug, Error)]
pub enum SafePathError {
    #[error("Path '{path}' escapes its root directory")]
    Escape { path: String },

    #[error("Failed to resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from extracting an uploaded archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Archive entry '{entry}' resolves outside the destination directory")]
    PathEscape { entry: String },

    #[error("Archive is corrupt: {0}")]
    CorruptArchive(String),

    #[error("Archive exceeds the size limit of {limit} bytes ({actual} bytes)")]
    SizeLimit { limit: u64, actual: u64 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the site registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Site '{directory_name}' not found")]
    NotFound { directory_name: String },

    #[error("Invalid site directory name '{0}'")]
    InvalidDirectoryName(String),

    #[error("Metadata record at {path} is corrupt: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from launching a site's start command.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Site '{directory_name}' has no start command")]
    EmptyCommand { directory_name: String },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {pid} started but its running state could not be recorded: {source}")]
    Record {
        pid: u32,
        #[source]
        source: RegistryError,
    },
}

/// Errors that abort a single upload before the site is registered.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
