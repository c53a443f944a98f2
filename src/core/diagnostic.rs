//! Diagnostic controller: the check, fix and verify cycle
//!
//! One call to [`DiagnosticController::run`] walks
//! `CheckRunning → CheckEnabled → CheckPortListening → TestAuth` and, when
//! auto-fix is on and something failed, one `Remediate → Reload → Retest`
//! cycle. A successful run finishes with `SyncEnvironment`, which brings the
//! application's env mirror in line with the live credential.
//!
//! The controller never returns an error. Every run resolves to an
//! immutable [`DiagnosticOutcome`] carrying the step log, and on failure the
//! failing step and its cause.
//!
//! Mutations are strictly backup-then-mutate, and a mutating run holds the
//! advisory [`RunLock`] on manager.conf for its whole duration.

use super::probe::PortProbe;
use super::protocol::{ProtocolClient, ProtocolOutcome, ProtocolResult};
use super::remediation::{apply_known_good, choose_secret, AclPolicy, SecretSource};
use super::service::ServiceController;
use crate::backup::{BackupHandle, BackupStore};
use crate::config::{endpoint, is_enabled, locate, locate_section, ConfigDocument, ConfigEditor};
use crate::constants::{
    AMI_READ_TIMEOUT_MS, DEFAULT_AMI_USERNAME, GENERAL_SECTION, GENERATED_SECRET_LENGTH,
};
use crate::env_store::{EnvKeys, EnvStore};
use crate::models::{Credential, SecureString, Username};
use crate::utils::{
    is_transient_error, retry_with_backoff, ConfigError, DiagnosticError, RetryConfig, RunLock,
};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Step log and outcome
// ============================================================================

/// One stage of a diagnostic run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AcquireLock,
    LoadConfig,
    CheckRunning,
    CheckEnabled,
    CheckPortListening,
    TestAuth,
    Remediate,
    Reload,
    Retest,
    SyncEnvironment,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::AcquireLock => "acquire-lock",
            Step::LoadConfig => "load-config",
            Step::CheckRunning => "check-running",
            Step::CheckEnabled => "check-enabled",
            Step::CheckPortListening => "check-port-listening",
            Step::TestAuth => "test-auth",
            Step::Remediate => "remediate",
            Step::Reload => "reload",
            Step::Retest => "retest",
            Step::SyncEnvironment => "sync-environment",
        };
        f.write_str(s)
    }
}

/// How a single step went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// The check failed and was repaired in place
    Fixed,
    Failed,
    /// Non-fatal finding
    Warning,
    Skipped,
}

impl StepStatus {
    fn label(self) -> &'static str {
        match self {
            StepStatus::Passed => "ok",
            StepStatus::Fixed => "fixed",
            StepStatus::Failed => "FAIL",
            StepStatus::Warning => "warn",
            StepStatus::Skipped => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub detail: String,
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Fixed,
    Failed,
}

/// Result of one controller invocation; immutable once built
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticOutcome {
    status: OutcomeStatus,
    steps: Vec<StepRecord>,
    failed_step: Option<Step>,
    cause: Option<String>,
    /// Credential in masked display form
    credential: Option<String>,
    protocol: Option<ProtocolOutcome>,
    changes: Vec<String>,
    backups: Vec<BackupHandle>,
}

impl DiagnosticOutcome {
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn failed_step(&self) -> Option<Step> {
        self.failed_step
    }

    /// Human-readable reason for a `Failed` outcome
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Last login attempt, if one was made
    pub fn protocol(&self) -> Option<&ProtocolOutcome> {
        self.protocol.as_ref()
    }

    /// Configuration changes written during remediation
    pub fn changes(&self) -> &[String] {
        &self.changes
    }

    /// Snapshots taken before each mutation
    pub fn backups(&self) -> &[BackupHandle] {
        &self.backups
    }

    pub fn is_success(&self) -> bool {
        self.status != OutcomeStatus::Failed
    }

    /// Process exit code: 0 ok/fixed, 2 when the configuration could not be
    /// loaded, 1 for any other failure
    pub fn exit_code(&self) -> i32 {
        match (self.status, self.failed_step) {
            (OutcomeStatus::Failed, Some(Step::LoadConfig)) => 2,
            (OutcomeStatus::Failed, _) => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for DiagnosticOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            OutcomeStatus::Ok => "OK",
            OutcomeStatus::Fixed => "FIXED",
            OutcomeStatus::Failed => "FAILED",
        };
        writeln!(f, "Status: {}", status)?;
        for record in &self.steps {
            writeln!(
                f,
                "  [{:<5}] {:<20} {}",
                record.status.label(),
                record.step.to_string(),
                record.detail
            )?;
        }
        for change in &self.changes {
            writeln!(f, "  change: {}", change)?;
        }
        for handle in &self.backups {
            writeln!(f, "  backup: {}", handle.snapshot_path().display())?;
        }
        if let (Some(step), Some(cause)) = (self.failed_step, &self.cause) {
            writeln!(f, "Failed at {}: {}", step, cause)?;
        }
        Ok(())
    }
}

/// Mutable step log of a run in progress
#[derive(Debug, Default)]
struct Run {
    steps: Vec<StepRecord>,
    credential: Option<String>,
    protocol: Option<ProtocolOutcome>,
    changes: Vec<String>,
    backups: Vec<BackupHandle>,
}

impl Run {
    fn record(&mut self, step: Step, status: StepStatus, detail: impl Into<String>) {
        let detail = detail.into();
        match status {
            StepStatus::Passed | StepStatus::Fixed => {
                tracing::info!(%step, status = status.label(), %detail, "step")
            }
            StepStatus::Failed | StepStatus::Warning => {
                tracing::warn!(%step, status = status.label(), %detail, "step")
            }
            StepStatus::Skipped => tracing::debug!(%step, %detail, "step skipped"),
        }
        self.steps.push(StepRecord {
            step,
            status,
            detail,
        });
    }

    fn finish(self, status: OutcomeStatus) -> DiagnosticOutcome {
        self.build(status, None, None)
    }

    fn fail(mut self, step: Step, error: DiagnosticError) -> DiagnosticOutcome {
        let cause = error.to_string();
        self.record(step, StepStatus::Failed, cause.clone());
        tracing::error!(%step, %cause, "diagnostic run failed");
        self.build(OutcomeStatus::Failed, Some(step), Some(cause))
    }

    fn build(
        self,
        status: OutcomeStatus,
        failed_step: Option<Step>,
        cause: Option<String>,
    ) -> DiagnosticOutcome {
        DiagnosticOutcome {
            status,
            steps: self.steps,
            failed_step,
            cause,
            credential: self.credential,
            protocol: self.protocol,
            changes: self.changes,
            backups: self.backups,
        }
    }
}

// ============================================================================
// Options and inventory
// ============================================================================

/// Per-run behaviour, resolved from settings and CLI flags
#[derive(Debug, Clone)]
pub struct DiagnosticOptions {
    /// Repair what fails instead of only reporting it
    pub auto_fix: bool,
    /// Signal the service to reload after a configuration rewrite
    pub reload: bool,
    /// Username to remediate or configure, instead of the located one
    pub username: Option<String>,
    /// Username used when the configuration has no credential section
    pub default_username: String,
    /// Secret to write, ahead of every other source
    pub secret: Option<SecureString>,
    pub reserved_section: String,
    pub acl_policy: AclPolicy,
    /// Bound on each phase of a login attempt
    pub login_timeout: Duration,
    /// Polling policy after a start or a remediation
    pub retry: RetryConfig,
    pub generated_secret_length: usize,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self {
            auto_fix: false,
            reload: true,
            username: None,
            default_username: DEFAULT_AMI_USERNAME.to_string(),
            secret: None,
            reserved_section: GENERAL_SECTION.to_string(),
            acl_policy: AclPolicy::default(),
            login_timeout: Duration::from_millis(AMI_READ_TIMEOUT_MS),
            retry: RetryConfig::default(),
            generated_secret_length: GENERATED_SECRET_LENGTH,
        }
    }
}

/// Where things stand, without touching anything
#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    pub manager_conf: PathBuf,
    pub sections: Vec<String>,
    pub credential_section: Option<String>,
    /// Located credential in masked display form
    pub credential: Option<String>,
    pub env_mirror: Option<PathBuf>,
    /// Mirrored keys that differ from the located credential
    pub env_drift: Vec<String>,
    pub backups: Vec<BackupHandle>,
    pub problems: Vec<String>,
}

/// Which sources a remediation may take its secret from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretPolicy {
    /// Explicit, env mirror, existing, generated
    KnownGood,
    /// Explicit, generated
    Fresh,
}

// ============================================================================
// Controller
// ============================================================================

/// Runs the reconciliation against injected collaborators
pub struct DiagnosticController {
    editor: Box<dyn ConfigEditor>,
    backups: Box<dyn BackupStore>,
    protocol: Box<dyn ProtocolClient>,
    service: Box<dyn ServiceController>,
    probe: Arc<dyn PortProbe>,
    env: Option<(EnvStore, EnvKeys)>,
    options: DiagnosticOptions,
}

impl DiagnosticController {
    pub fn new(
        editor: Box<dyn ConfigEditor>,
        backups: Box<dyn BackupStore>,
        protocol: Box<dyn ProtocolClient>,
        service: Box<dyn ServiceController>,
        probe: Arc<dyn PortProbe>,
        options: DiagnosticOptions,
    ) -> Self {
        Self {
            editor,
            backups,
            protocol,
            service,
            probe,
            env: None,
            options,
        }
    }

    /// Keep `store` in sync with the live credential
    pub fn with_env_mirror(mut self, store: EnvStore, keys: EnvKeys) -> Self {
        self.env = Some((store, keys));
        self
    }

    pub fn options(&self) -> &DiagnosticOptions {
        &self.options
    }

    /// Full check, and with auto-fix one remediation cycle
    pub async fn run(&self) -> DiagnosticOutcome {
        let mut run = Run::default();
        let auto_fix = self.options.auto_fix;
        let reserved = self.options.reserved_section.as_str();
        tracing::info!(
            manager_conf = %self.editor.path().display(),
            auto_fix,
            "starting diagnostic run"
        );

        let _lock = if auto_fix {
            match self.lock(&mut run) {
                Ok(lock) => Some(lock),
                Err(e) => return run.fail(Step::AcquireLock, e),
            }
        } else {
            None
        };

        let doc = match self.editor.load() {
            Ok(doc) => {
                run.record(
                    Step::LoadConfig,
                    StepStatus::Passed,
                    self.editor.path().display().to_string(),
                );
                doc
            }
            Err(e) => return run.fail(Step::LoadConfig, e.into()),
        };

        let mut needs_fix = false;
        let mut started = false;

        if self.service.is_active().await {
            run.record(Step::CheckRunning, StepStatus::Passed, "service is active");
        } else if !auto_fix {
            return run.fail(
                Step::CheckRunning,
                DiagnosticError::Unreachable("service is not running".to_string()),
            );
        } else {
            match self.service.start().await {
                Ok(()) if self.service.is_active().await => {
                    started = true;
                    run.record(Step::CheckRunning, StepStatus::Fixed, "service started");
                }
                Ok(()) => {
                    return run.fail(
                        Step::CheckRunning,
                        DiagnosticError::RemediationFailed(
                            "service did not become active after start".to_string(),
                        ),
                    )
                }
                Err(e) => {
                    return run.fail(
                        Step::CheckRunning,
                        DiagnosticError::RemediationFailed(format!("service start failed: {}", e)),
                    )
                }
            }
        }

        if is_enabled(&doc, reserved) {
            run.record(Step::CheckEnabled, StepStatus::Passed, format!("[{}] enabled", reserved));
        } else if !auto_fix {
            return run.fail(
                Step::CheckEnabled,
                DiagnosticError::Unreachable(format!(
                    "manager interface is disabled in [{}]",
                    reserved
                )),
            );
        } else {
            needs_fix = true;
            run.record(
                Step::CheckEnabled,
                StepStatus::Failed,
                format!("[{}] disabled; remediating", reserved),
            );
        }

        let (host, port) = endpoint(&doc, reserved);
        let mut listening = self.probe.is_listening(&host, port).await;
        if !listening && started {
            listening = self.wait_for_port(&host, port).await;
        }
        if listening {
            run.record(
                Step::CheckPortListening,
                StepStatus::Passed,
                format!("{}:{} listening", host, port),
            );
        } else if !auto_fix {
            return run.fail(Step::CheckPortListening, DiagnosticError::PortNotListening(port));
        } else {
            needs_fix = true;
            run.record(
                Step::CheckPortListening,
                StepStatus::Failed,
                format!("{}:{} not listening; remediating", host, port),
            );
        }

        let located = locate(&doc, reserved);
        if needs_fix {
            run.record(Step::TestAuth, StepStatus::Skipped, "remediation pending");
        } else {
            match &located {
                Ok(credential) => {
                    run.credential = Some(credential.to_string());
                    let outcome = self
                        .protocol
                        .login(credential, self.options.login_timeout)
                        .await;
                    let failure = self.login_failure(&outcome);
                    run.protocol = Some(outcome);
                    match failure {
                        None => {
                            run.record(Step::TestAuth, StepStatus::Passed, "authenticated");
                            let status = if started {
                                OutcomeStatus::Fixed
                            } else {
                                OutcomeStatus::Ok
                            };
                            return self.sync_environment(run, credential, status);
                        }
                        Some(err) if !auto_fix => return run.fail(Step::TestAuth, err),
                        Some(err) => run.record(Step::TestAuth, StepStatus::Failed, err.to_string()),
                    }
                }
                Err(_) if !auto_fix => return run.fail(Step::TestAuth, DiagnosticError::SecretNotFound),
                Err(e) => run.record(Step::TestAuth, StepStatus::Failed, e.to_string()),
            }
        }

        self.remediate_and_verify(run, doc, located.ok(), port, SecretPolicy::KnownGood)
            .await
    }

    /// Write an explicit or freshly generated credential, then verify it
    pub async fn configure(&self) -> DiagnosticOutcome {
        let mut run = Run::default();
        let _lock = match self.lock(&mut run) {
            Ok(lock) => lock,
            Err(e) => return run.fail(Step::AcquireLock, e),
        };

        let doc = match self.editor.load() {
            Ok(doc) => {
                run.record(
                    Step::LoadConfig,
                    StepStatus::Passed,
                    self.editor.path().display().to_string(),
                );
                doc
            }
            Err(e) => return run.fail(Step::LoadConfig, e.into()),
        };

        let (_, port) = endpoint(&doc, &self.options.reserved_section);
        let located = locate(&doc, &self.options.reserved_section).ok();
        self.remediate_and_verify(run, doc, located, port, SecretPolicy::Fresh)
            .await
    }

    /// Read-only report of config, env mirror and backups
    pub fn inventory(&self) -> Inventory {
        let reserved = self.options.reserved_section.as_str();
        let mut inventory = Inventory {
            manager_conf: self.editor.path().to_path_buf(),
            sections: Vec::new(),
            credential_section: None,
            credential: None,
            env_mirror: self.env.as_ref().map(|(store, _)| store.path().to_path_buf()),
            env_drift: Vec::new(),
            backups: Vec::new(),
            problems: Vec::new(),
        };

        match self.editor.load() {
            Ok(doc) => {
                inventory.sections = doc.sections().map(str::to_string).collect();
                inventory.credential_section = locate_section(&doc, reserved);
                match locate(&doc, reserved) {
                    Ok(credential) => {
                        inventory.credential = Some(credential.to_string());
                        if let Some((store, keys)) = &self.env {
                            match store.load() {
                                Ok(file) => inventory.env_drift = file.drift(keys, &credential),
                                Err(e) => inventory.problems.push(e.to_string()),
                            }
                        }
                    }
                    Err(e) => inventory.problems.push(e.to_string()),
                }
            }
            Err(e) => inventory.problems.push(DiagnosticError::from(e).to_string()),
        }

        let mut sources = vec![self.editor.path().to_path_buf()];
        sources.extend(inventory.env_mirror.clone());
        for source in sources {
            match self.backups.list(&source) {
                Ok(list) => inventory.backups.extend(list),
                Err(e) => inventory.problems.push(e.to_string()),
            }
        }
        inventory
    }

    fn lock(&self, run: &mut Run) -> Result<RunLock, DiagnosticError> {
        let target = self.editor.path();
        match RunLock::acquire(target) {
            Ok(lock) => {
                run.record(
                    Step::AcquireLock,
                    StepStatus::Passed,
                    lock.path().display().to_string(),
                );
                Ok(lock)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(ConfigError::Locked(RunLock::path_for(target)).into())
            }
            Err(source) => Err(ConfigError::Io {
                path: RunLock::path_for(target),
                source,
            }
            .into()),
        }
    }

    async fn wait_for_port(&self, host: &str, port: u16) -> bool {
        let probe = &self.probe;
        retry_with_backoff(
            &self.options.retry,
            || async move {
                if probe.is_listening(host, port).await {
                    Ok(())
                } else {
                    Err(format!("port {} not listening", port))
                }
            },
            |e: &String| is_transient_error(e),
        )
        .await
        .is_ok()
    }

    fn login_failure(&self, outcome: &ProtocolOutcome) -> Option<DiagnosticError> {
        match outcome.result {
            ProtocolResult::Authenticated => None,
            ProtocolResult::AuthFailed => Some(DiagnosticError::AuthFailed),
            ProtocolResult::Timeout => Some(DiagnosticError::Timeout(self.options.login_timeout)),
            ProtocolResult::Unreachable => Some(DiagnosticError::Unreachable(outcome.raw.clone())),
        }
    }

    fn env_secret(&self) -> Option<String> {
        let (store, keys) = self.env.as_ref()?;
        match store.load() {
            Ok(file) => file.get(&keys.secret()),
            Err(e) => {
                tracing::warn!(error = %e, "environment mirror unreadable; ignoring its secret");
                None
            }
        }
    }

    /// Remediate, reload, retest, then sync the env mirror
    async fn remediate_and_verify(
        &self,
        mut run: Run,
        doc: ConfigDocument,
        located: Option<Credential>,
        port: u16,
        policy: SecretPolicy,
    ) -> DiagnosticOutcome {
        let credential = match self.remediate(&mut run, doc, located, port, policy) {
            Ok(credential) => credential,
            Err(e) => return run.fail(Step::Remediate, e),
        };
        run.credential = Some(credential.to_string());

        if self.options.reload {
            match self.service.reload().await {
                Ok(()) => run.record(Step::Reload, StepStatus::Passed, "configuration reloaded"),
                Err(reload_err) => match self.service.restart().await {
                    Ok(()) => run.record(
                        Step::Reload,
                        StepStatus::Fixed,
                        format!("reload failed ({}); service restarted", reload_err),
                    ),
                    Err(restart_err) => {
                        return run.fail(
                            Step::Reload,
                            DiagnosticError::RemediationFailed(format!(
                                "reload failed: {}; restart failed: {}",
                                reload_err, restart_err
                            )),
                        )
                    }
                },
            }
        } else {
            run.record(Step::Reload, StepStatus::Skipped, "reload disabled");
        }

        let protocol = &*self.protocol;
        let login_timeout = self.options.login_timeout;
        let cred = &credential;
        let retest = retry_with_backoff(
            &self.options.retry,
            || async move {
                let outcome = protocol.login(cred, login_timeout).await;
                if outcome.is_authenticated() {
                    Ok(outcome)
                } else {
                    Err(outcome)
                }
            },
            |outcome: &ProtocolOutcome| is_transient_error(&outcome.to_string()),
        )
        .await;

        match retest {
            Ok(outcome) => {
                run.protocol = Some(outcome);
                run.record(Step::Retest, StepStatus::Passed, "authenticated");
                self.sync_environment(run, &credential, OutcomeStatus::Fixed)
            }
            Err(outcome) => {
                let err = self
                    .login_failure(&outcome)
                    .unwrap_or(DiagnosticError::AuthFailed);
                run.protocol = Some(outcome);
                run.fail(Step::Retest, err)
            }
        }
    }

    /// Rewrite manager.conf to the known-good shape, snapshotting first
    fn remediate(
        &self,
        run: &mut Run,
        mut doc: ConfigDocument,
        located: Option<Credential>,
        port: u16,
        policy: SecretPolicy,
    ) -> Result<Credential, DiagnosticError> {
        let reserved = self.options.reserved_section.as_str();
        let username = match (&self.options.username, &located) {
            (Some(name), _) => Username::new(name.as_str())?,
            (None, Some(credential)) => credential.username().clone(),
            (None, None) => Username::new(self.options.default_username.as_str())?,
        };

        let explicit = self.options.secret.as_ref().map(SecureString::as_str);
        let (secret, source) = match policy {
            SecretPolicy::KnownGood => {
                let env_secret = self.env_secret();
                let existing = doc.get_value(username.as_str(), "secret");
                choose_secret(
                    explicit,
                    env_secret.as_deref(),
                    existing.as_deref(),
                    self.options.generated_secret_length,
                )
            }
            SecretPolicy::Fresh => {
                choose_secret(explicit, None, None, self.options.generated_secret_length)
            }
        };
        if source == SecretSource::Generated {
            tracing::info!(secret = %secret.masked(), "generated a new manager secret");
        }

        let changes = apply_known_good(
            &mut doc,
            reserved,
            username.as_str(),
            &secret,
            port,
            self.options.acl_policy,
        );

        if doc.is_modified() {
            let path = self.editor.path();
            let handle = self.backups.backup(path)?;
            run.backups.push(handle.clone());
            self.editor.save(&doc, &handle)?;
            run.record(
                Step::Remediate,
                StepStatus::Fixed,
                format!(
                    "{} change(s) to [{}] and [{}]; secret from {:?}",
                    changes.len(),
                    reserved,
                    username,
                    source
                ),
            );
            run.changes.extend(changes);
        } else {
            run.record(
                Step::Remediate,
                StepStatus::Passed,
                "configuration already in known-good state",
            );
        }

        let (host, port) = endpoint(&doc, reserved);
        Ok(Credential::new(username, secret, host, port))
    }

    /// Bring the env mirror in line with `credential` and finish the run
    fn sync_environment(
        &self,
        mut run: Run,
        credential: &Credential,
        status: OutcomeStatus,
    ) -> DiagnosticOutcome {
        let Some((store, keys)) = &self.env else {
            run.record(Step::SyncEnvironment, StepStatus::Skipped, "no environment mirror");
            return run.finish(status);
        };

        let mut file = match store.load() {
            Ok(file) => file,
            Err(e) => {
                run.record(Step::SyncEnvironment, StepStatus::Warning, e.to_string());
                return run.finish(status);
            }
        };

        let drift = file.drift(keys, credential);
        if drift.is_empty() {
            run.record(
                Step::SyncEnvironment,
                StepStatus::Passed,
                format!("{} consistent", store.path().display()),
            );
            return run.finish(status);
        }
        if !self.options.auto_fix {
            run.record(
                Step::SyncEnvironment,
                StepStatus::Warning,
                format!("{} differs: {}", store.path().display(), drift.join(", ")),
            );
            return run.finish(status);
        }

        let handle = match self.backups.backup(store.path()) {
            Ok(handle) => handle,
            Err(e) => return run.fail(Step::SyncEnvironment, DiagnosticError::BackupFailed(e)),
        };
        run.backups.push(handle.clone());
        let changed = file.apply_credential(keys, credential);
        if let Err(e) = store.save(&file, &handle) {
            return run.fail(Step::SyncEnvironment, e.into());
        }
        run.record(
            Step::SyncEnvironment,
            StepStatus::Fixed,
            format!("{} updated: {}", store.path().display(), changed.join(", ")),
        );
        run.finish(status)
    }
}
