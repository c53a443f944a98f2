//! # Application-Wide Constants
//!
//! Default paths, ports, timeouts and key names used throughout amidoctor.
//! Every value here can be overridden through [`crate::settings::Settings`];
//! these are only the built-in fallbacks.
//!
//! ## Usage
//!
//! ```rust
//! use amidoctor::constants::*;
//! use std::time::Duration;
//!
//! let timeout = Duration::from_millis(AMI_CONNECT_TIMEOUT_MS);
//! assert_eq!(DEFAULT_AMI_PORT, 5038);
//! ```

// ============================================================================
// Manager Interface
// ============================================================================

/// Default TCP port of the manager interface
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Host used when `bindaddr` is absent or a wildcard address
pub const DEFAULT_AMI_HOST: &str = "127.0.0.1";

/// Section of manager.conf that holds interface-wide options
///
/// Skipped by the credential locator: it never carries a user secret.
pub const GENERAL_SECTION: &str = "general";

/// Username written by remediation when no user section exists yet
pub const DEFAULT_AMI_USERNAME: &str = "admin";

/// Length of generated secrets (alphanumeric)
pub const GENERATED_SECRET_LENGTH: usize = 24;

/// Permission classes granted to a user section created by remediation
///
/// Existing `read`/`write` lines are never overwritten.
pub const DEFAULT_AMI_PERMISSIONS: &str =
    "system,call,log,verbose,command,agent,user,config,dtmf,reporting,cdr,dialplan,originate";

/// ACL pair written when the user section carries no ACL of its own
pub const DEFAULT_ACL_DENY: &str = "0.0.0.0/0.0.0.0";
pub const DEFAULT_ACL_PERMIT: &str = "127.0.0.1/255.255.255.0";

// ============================================================================
// Timeouts and Retry Limits
// ============================================================================

/// TCP connect timeout for the login handshake (milliseconds)
pub const AMI_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Upper bound on reading the login response (milliseconds)
///
/// A stalled manager must not hang the controller; anything slower than
/// this is reported as `Timeout`.
pub const AMI_READ_TIMEOUT_MS: u64 = 5000;

/// Connect timeout for the fallback port probe (milliseconds)
pub const TCP_PROBE_TIMEOUT_MS: u64 = 1200;

/// Upper bound on a single service-manager command (seconds)
pub const SERVICE_COMMAND_TIMEOUT_SECS: u64 = 20;

/// Re-probe attempts after a fix (not counting the first probe)
pub const POST_FIX_RETRIES: u32 = 3;

/// Initial delay between post-fix re-probes (milliseconds)
pub const POST_FIX_INITIAL_DELAY_MS: u64 = 1000;

/// Ceiling for the post-fix backoff delay (milliseconds)
pub const POST_FIX_MAX_DELAY_MS: u64 = 8000;

// ============================================================================
// Files
// ============================================================================

/// Native manager configuration file
pub const DEFAULT_MANAGER_CONF: &str = "/etc/asterisk/manager.conf";

/// Environment mirror candidates, highest priority first
///
/// System-wide, then project root, then the current directory. The first
/// file that exists is authoritative for the run.
pub const DEFAULT_ENV_CANDIDATES: &[&str] =
    &["/etc/amidoctor/amidoctor.env", "/opt/pbx/.env", ".env"];

/// Prefix of the mirrored keys (`<PREFIX>_HOST`, `<PREFIX>_SECRET`, ...)
pub const DEFAULT_ENV_PREFIX: &str = "ASTERISK_AMI";

/// Directory for point-in-time snapshots
pub const DEFAULT_BACKUP_DIR: &str = "/var/backups/amidoctor";

/// Snapshots kept per source file before the oldest are pruned
pub const DEFAULT_BACKUP_RETENTION: usize = 10;

/// Suffix of the advisory lock file created next to manager.conf
pub const RUN_LOCK_SUFFIX: &str = "amidoctor.lock";

/// Refuse to snapshot files larger than this (bytes)
///
/// manager.conf and env files are a few kilobytes; anything larger is not
/// the file we think it is.
pub const MAX_BACKUP_FILE_SIZE: u64 = 16 * 1024 * 1024;

// ============================================================================
// Service Manager
// ============================================================================

/// systemd unit of the PBX
pub const DEFAULT_SERVICE_UNIT: &str = "asterisk";

/// PBX console binary used for in-process module reloads
pub const DEFAULT_PBX_CLI: &str = "asterisk";

/// Environment variable naming a JSON settings file
pub const SETTINGS_ENV_VAR: &str = "AMIDOCTOR_SETTINGS";

/// Environment variable overriding the log filter
pub const LOG_ENV_VAR: &str = "AMIDOCTOR_LOG";
