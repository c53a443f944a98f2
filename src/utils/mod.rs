//! # Utilities Module
//!
//! Cross-cutting concerns shared by the config, backup and diagnostic layers.
//!
//! ## Modules
//!
//! - [`errors`]: Typed error hierarchy using `thiserror` for domain-specific errors
//! - [`retry`]: Bounded retry with exponential backoff for post-fix polling
//! - [`fsio`]: Atomic file replacement and the advisory run lock
//!
//! ## Design Notes
//!
//! Error types are defined here to avoid circular dependencies between the
//! `config`, `backup` and `core` modules. Every domain error converts into
//! [`DiagnosticError`], the taxonomy the controller reports against.

pub mod errors;
pub mod fsio;
pub mod retry;

pub use errors::{
    BackupError, ConfigError, CredentialError, DiagnosticError, EnvError, SettingsError,
};
pub use fsio::{atomic_write, RunLock};
pub use retry::{is_transient_error, retry_with_backoff, RetryConfig};
