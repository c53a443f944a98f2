//! Loading and saving the native manager configuration
//!
//! The [`ConfigEditor`] seam lets the diagnostic controller read and rewrite
//! manager.conf without knowing where it lives. Saving requires a
//! [`BackupHandle`] of the file's current content, so a write without a
//! preceding snapshot does not type-check, and a snapshot of stale content
//! is refused at runtime.

use super::document::ConfigDocument;
use crate::backup::{sha256_hex, BackupHandle};
use crate::utils::{atomic_write, BackupError, ConfigError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Read/write access to one configuration document
pub trait ConfigEditor: Send + Sync {
    /// File this editor manages
    fn path(&self) -> &Path;

    /// Re-read and parse the document from its source of truth
    fn load(&self) -> Result<ConfigDocument, ConfigError>;

    /// Replace the document on disk
    ///
    /// `backup` must be a snapshot of exactly the content being replaced.
    fn save(&self, doc: &ConfigDocument, backup: &BackupHandle) -> Result<(), ConfigError>;
}

/// Editor for a configuration file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileConfigEditor {
    path: PathBuf,
}

impl FileConfigEditor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        match source.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(self.path.clone()),
            _ => ConfigError::Io {
                path: self.path.clone(),
                source,
            },
        }
    }
}

impl ConfigEditor for FileConfigEditor {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<ConfigDocument, ConfigError> {
        let bytes = fs::read(&self.path).map_err(|e| self.io_error(e))?;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "loaded configuration");
        Ok(ConfigDocument::parse(&bytes))
    }

    fn save(&self, doc: &ConfigDocument, backup: &BackupHandle) -> Result<(), ConfigError> {
        backup.ensure_covers(&self.path)?;

        let current = fs::read(&self.path).map_err(|e| self.io_error(e))?;
        if sha256_hex(&current) != backup.checksum() {
            return Err(BackupError::Stale(self.path.clone()).into());
        }

        atomic_write(&self.path, &doc.serialize()).map_err(|e| self.io_error(e))?;
        tracing::info!(
            path = %self.path.display(),
            snapshot = %backup.snapshot_path().display(),
            "configuration written"
        );
        Ok(())
    }
}
