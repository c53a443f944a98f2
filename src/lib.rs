//! amidoctor - manager interface credential reconciliation
//!
//! Core library behind the `amidoctor` binary: a lossless manager.conf
//! editor, content-addressed backups, the manager protocol client and the
//! diagnostic controller that ties them together.

pub mod backup;
pub mod config;
pub mod constants;
pub mod core;
pub mod env_store;
pub mod logger;
pub mod models;
pub mod settings;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{DiagnosticController, DiagnosticOptions, DiagnosticOutcome, OutcomeStatus};
pub use config::{ConfigDocument, ConfigEditor, FileConfigEditor};
pub use models::{Credential, SecureString, Username};
pub use settings::Settings;
pub use utils::{BackupError, ConfigError, CredentialError, DiagnosticError, EnvError};
