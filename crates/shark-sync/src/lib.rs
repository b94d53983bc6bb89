//! Reconciles a tree of markdown planning documents with the work-item database.
//!
//! The database owns task status; documents own titles, descriptions and file
//! locations. A run discovers epics and features, scans task files, filters
//! them by modification time, parses metadata, resolves field conflicts and
//! applies everything inside one transaction.

use shark_core::patterns::PatternError;
use shark_storage::StorageError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod config;
pub mod conflict;
pub mod discovery;
pub mod document;
pub mod engine;
pub mod folders;
pub mod incremental;
pub mod index;
pub mod keygen;
pub mod report;
pub mod resolver;
pub mod scanner;

pub use config::ProjectConfig;
pub use engine::{CancellationToken, EngineConfig, SyncEngine, SyncOptions, SyncPhase};
pub use report::{format_report, DiscoveryReport, SyncReport};
pub use resolver::{ConflictPrompt, LinePrompt};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("manual resolution aborted: {0}")]
    Prompt(String),
    #[error("sync cancelled before {0}")]
    Cancelled(SyncPhase),
    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },
}

impl SyncError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replaces `path` through a sibling temp file so readers never see a partial
/// write. Existing permissions carry over to the new file.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());

    fs::write(&tmp_path, contents)?;
    if let Some(permissions) = permissions {
        if let Err(err) = fs::set_permissions(&tmp_path, permissions) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
