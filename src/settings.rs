//! Tunables, resolved once per process
//!
//! Resolution order: built-in defaults, then a JSON settings file
//! (`--settings <path>` or `$AMIDOCTOR_SETTINGS`), then CLI flags. Keys
//! missing from the file keep their defaults. The resolved value is passed
//! explicitly to every component that needs it.

use crate::constants::{
    AMI_CONNECT_TIMEOUT_MS, AMI_READ_TIMEOUT_MS, DEFAULT_AMI_USERNAME, DEFAULT_BACKUP_DIR,
    DEFAULT_BACKUP_RETENTION, DEFAULT_ENV_CANDIDATES, DEFAULT_ENV_PREFIX, DEFAULT_MANAGER_CONF,
    DEFAULT_PBX_CLI, DEFAULT_SERVICE_UNIT, GENERAL_SECTION, GENERATED_SECRET_LENGTH,
    SERVICE_COMMAND_TIMEOUT_SECS, SETTINGS_ENV_VAR, TCP_PROBE_TIMEOUT_MS,
};
use crate::core::{AclPolicy, DiagnosticOptions};
use crate::models::SecureString;
use crate::utils::{RetryConfig, SettingsError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Native manager configuration file
    pub manager_conf: PathBuf,
    /// Env mirror candidates, highest priority first
    pub env_candidates: Vec<PathBuf>,
    /// Prefix of the mirrored env keys (`<prefix>_SECRET`, ...)
    pub env_prefix: String,
    pub backup_dir: PathBuf,
    /// Snapshots kept per source file; 0 keeps all
    pub backup_retention: usize,
    pub service_unit: String,
    /// PBX binary used for `-rx "manager reload"`
    pub pbx_cli: String,
    pub reserved_section: String,
    pub default_username: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub service_timeout_secs: u64,
    pub retry: RetryConfig,
    pub acl_policy: AclPolicy,
    pub reload_after_fix: bool,
    pub generated_secret_length: usize,
    /// Also append logs here
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manager_conf: PathBuf::from(DEFAULT_MANAGER_CONF),
            env_candidates: DEFAULT_ENV_CANDIDATES.iter().map(PathBuf::from).collect(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            backup_retention: DEFAULT_BACKUP_RETENTION,
            service_unit: DEFAULT_SERVICE_UNIT.to_string(),
            pbx_cli: DEFAULT_PBX_CLI.to_string(),
            reserved_section: GENERAL_SECTION.to_string(),
            default_username: DEFAULT_AMI_USERNAME.to_string(),
            connect_timeout_ms: AMI_CONNECT_TIMEOUT_MS,
            read_timeout_ms: AMI_READ_TIMEOUT_MS,
            probe_timeout_ms: TCP_PROBE_TIMEOUT_MS,
            service_timeout_secs: SERVICE_COMMAND_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            acl_policy: AclPolicy::default(),
            reload_after_fix: true,
            generated_secret_length: GENERATED_SECRET_LENGTH,
            log_file: None,
        }
    }
}

/// Values given on the command line; `None` leaves the setting alone
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub manager_conf: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub no_reload: bool,
}

impl Settings {
    /// Defaults overlaid with the settings file, if any
    ///
    /// `explicit` wins over `$AMIDOCTOR_SETTINGS`. A named file that does not
    /// exist is an error; with no file named, defaults are returned.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let from_env = std::env::var_os(SETTINGS_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::load_from(explicit.map(Path::to_path_buf).or(from_env))
    }

    fn load_from(path: Option<PathBuf>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let settings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn apply(&mut self, overrides: &CliOverrides) {
        if let Some(path) = &overrides.manager_conf {
            self.manager_conf = path.clone();
        }
        if let Some(path) = &overrides.env_file {
            // An explicit env file is the only candidate.
            self.env_candidates = vec![path.clone()];
        }
        if let Some(dir) = &overrides.backup_dir {
            self.backup_dir = dir.clone();
        }
        if overrides.no_reload {
            self.reload_after_fix = false;
        }
    }

    /// Controller options for one run
    pub fn diagnostic_options(
        &self,
        auto_fix: bool,
        username: Option<String>,
        secret: Option<SecureString>,
    ) -> DiagnosticOptions {
        DiagnosticOptions {
            auto_fix,
            reload: self.reload_after_fix,
            username,
            default_username: self.default_username.clone(),
            secret,
            reserved_section: self.reserved_section.clone(),
            acl_policy: self.acl_policy,
            login_timeout: Duration::from_millis(self.read_timeout_ms),
            retry: self.retry.clone(),
            generated_secret_length: self.generated_secret_length,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn no_file_means_defaults() {
        let settings = Settings::load_from(None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.manager_conf, PathBuf::from("/etc/asterisk/manager.conf"));
        assert_eq!(settings.env_prefix, "ASTERISK_AMI");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{
                "manager_conf": "/srv/pbx/manager.conf",
                "acl_policy": "reset",
                "retry": { "max_retries": 5, "initial_delay": 250 }
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from(Some(path)).unwrap();
        assert_eq!(settings.manager_conf, PathBuf::from("/srv/pbx/manager.conf"));
        assert_eq!(settings.acl_policy, AclPolicy::Reset);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(settings.retry.max_delay, RetryConfig::default().max_delay);
        assert_eq!(settings.backup_retention, DEFAULT_BACKUP_RETENTION);
    }

    #[test]
    fn named_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Settings::load_from(Some(dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load_from(Some(path)),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn cli_flags_override_file() {
        let mut settings = Settings::default();
        settings.apply(&CliOverrides {
            manager_conf: Some(PathBuf::from("/tmp/manager.conf")),
            env_file: Some(PathBuf::from("/tmp/app.env")),
            backup_dir: None,
            no_reload: true,
        });
        assert_eq!(settings.manager_conf, PathBuf::from("/tmp/manager.conf"));
        assert_eq!(settings.env_candidates, vec![PathBuf::from("/tmp/app.env")]);
        assert_eq!(settings.backup_dir, PathBuf::from(DEFAULT_BACKUP_DIR));

        let options = settings.diagnostic_options(true, None, None);
        assert!(options.auto_fix);
        assert!(!options.reload);
    }
}
