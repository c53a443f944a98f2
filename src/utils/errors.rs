//! Error types for amidoctor
//!
//! All error types use thiserror for clean error handling.
//! SECURITY: Error messages MUST NOT contain secrets or sensitive data.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error taxonomy of a reconciliation run
///
/// The diagnostic controller never hands these to its caller directly; it
/// folds them into a `DiagnosticOutcome`. The one-shot CLI commands
/// (`test`, `configure`) surface them as-is.
#[derive(Debug, thiserror::Error)]
pub enum DiagnosticError {
    #[error("Manager configuration not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("No user section with a secret found")]
    SecretNotFound,

    #[error("Backup failed: {0}")]
    BackupFailed(#[from] BackupError),

    #[error("Port {0} is not listening")]
    PortNotListening(u16),

    #[error("Manager interface unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Remediation failed: {0}")]
    RemediationFailed(String),

    #[error("Another run holds the lock at {}", .0.display())]
    ConcurrentRun(PathBuf),

    #[error("Configuration error: {0}")]
    Config(ConfigError),

    #[error("Environment file error: {0}")]
    Env(#[from] EnvError),
}

impl From<ConfigError> for DiagnosticError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => DiagnosticError::ConfigNotFound(path),
            ConfigError::Locked(path) => DiagnosticError::ConcurrentRun(path),
            other => DiagnosticError::Config(other),
        }
    }
}

impl From<CredentialError> for DiagnosticError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::SecretNotFound => DiagnosticError::SecretNotFound,
            other => DiagnosticError::RemediationFailed(other.to_string()),
        }
    }
}

/// Errors from reading or writing the native configuration document
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock held: {}", .0.display())]
    Locked(PathBuf),

    #[error("Write refused: {0}")]
    Backup(#[from] BackupError),
}

/// Errors from the snapshot store
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot missing: {}", .0.display())]
    SnapshotMissing(PathBuf),

    #[error("Snapshot content does not match its checksum: {}", .0.display())]
    ChecksumMismatch(PathBuf),

    #[error("{} changed since it was snapshotted", .0.display())]
    Stale(PathBuf),

    #[error("Backup handle is for {}, not {}", .handle.display(), .target.display())]
    Mismatch { handle: PathBuf, target: PathBuf },

    #[error("Refusing to snapshot {} ({size} bytes exceeds limit)", .path.display())]
    TooLarge { path: PathBuf, size: u64 },
}

/// Errors from credential handling
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No section with a secret found")]
    SecretNotFound,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

/// Errors from the environment mirror
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("No environment file found among {0} candidate(s)")]
    NotFound(usize),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write refused: {0}")]
    Backup(#[from] BackupError),
}

/// Errors from loading the settings file
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
