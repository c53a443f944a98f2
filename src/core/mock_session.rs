//! Test doubles for the diagnostic controller's collaborators
//!
//! Each double is cheap to clone and shares its state through an `Arc`, so a
//! test keeps one clone for assertions and hands the other to the controller.

use super::probe::{PortProbe, ProbeMethod, TcpProbeResult};
use super::protocol::{ProtocolClient, ProtocolOutcome, ProtocolResult};
use super::service::ServiceController;
use crate::backup::{BackupHandle, BackupStore};
use crate::models::Credential;
use crate::utils::BackupError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Default)]
struct ServiceState {
    active: AtomicBool,
    start_activates: AtomicBool,
    reload_fails: AtomicBool,
    starts: AtomicUsize,
    reloads: AtomicUsize,
    restarts: AtomicUsize,
}

/// Service whose state is a pair of flags
#[derive(Debug, Clone, Default)]
pub struct MockService {
    state: Arc<ServiceState>,
}

impl MockService {
    /// A running service
    pub fn running() -> Self {
        let service = Self::default();
        service.state.active.store(true, Ordering::SeqCst);
        service
    }

    /// A stopped service; `start_activates` decides whether `start` works
    pub fn stopped(start_activates: bool) -> Self {
        let service = Self::default();
        service
            .state
            .start_activates
            .store(start_activates, Ordering::SeqCst);
        service
    }

    pub fn failing_reload(self) -> Self {
        self.state.reload_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.state.reloads.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.state.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceController for MockService {
    async fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), String> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.state.start_activates.load(Ordering::SeqCst) {
            self.state.active.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), String> {
        self.state.reloads.fetch_add(1, Ordering::SeqCst);
        if self.state.reload_fails.load(Ordering::SeqCst) {
            return Err("console unavailable".to_string());
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), String> {
        self.state.restarts.fetch_add(1, Ordering::SeqCst);
        self.state.active.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Probe answering from a script, then repeating its fallback
#[derive(Debug, Clone)]
pub struct MockProbe {
    script: Arc<Mutex<VecDeque<bool>>>,
    fallback: bool,
    calls: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn always(listening: bool) -> Self {
        Self::scripted(&[], listening)
    }

    pub fn scripted(answers: &[bool], fallback: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(answers.iter().copied().collect())),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortProbe for MockProbe {
    async fn probe(&self, _host: &str, port: u16) -> TcpProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(self.fallback);
        TcpProbeResult {
            port,
            ok,
            method: ProbeMethod::ListenTable,
            error: (!ok).then(|| "mock: not listening".to_string()),
        }
    }
}

// ============================================================================
// Protocol
// ============================================================================

/// Protocol client replaying scripted results
#[derive(Debug, Clone)]
pub struct ScriptedProtocol {
    script: Arc<Mutex<VecDeque<ProtocolResult>>>,
    fallback: ProtocolResult,
    secrets_seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProtocol {
    pub fn always(result: ProtocolResult) -> Self {
        Self::scripted(&[], result)
    }

    pub fn scripted(results: &[ProtocolResult], fallback: ProtocolResult) -> Self {
        Self {
            script: Arc::new(Mutex::new(results.iter().copied().collect())),
            fallback,
            secrets_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.secrets_seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Secrets presented, in call order
    pub fn secrets_seen(&self) -> Vec<String> {
        self.secrets_seen
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProtocolClient for ScriptedProtocol {
    async fn login(&self, credential: &Credential, _timeout: Duration) -> ProtocolOutcome {
        if let Ok(mut seen) = self.secrets_seen.lock() {
            seen.push(credential.secret().as_str().to_string());
        }
        let result = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(self.fallback);
        let raw = match result {
            ProtocolResult::Authenticated => "Response: Success\nMessage: Authentication accepted",
            ProtocolResult::AuthFailed => "Response: Error\nMessage: Authentication failed",
            _ => "",
        };
        ProtocolOutcome {
            result,
            raw: raw.to_string(),
            banner: Some("Asterisk Call Manager/9.0.0".to_string()),
        }
    }
}

// ============================================================================
// Backups
// ============================================================================

/// Backup store that can never take a snapshot
#[derive(Debug, Clone, Default)]
pub struct FailingBackupStore;

impl BackupStore for FailingBackupStore {
    fn backup(&self, path: &Path) -> Result<BackupHandle, BackupError> {
        Err(BackupError::Io {
            path: PathBuf::from("/nonexistent/backups").join(path.file_name().unwrap_or_default()),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only backup volume"),
        })
    }

    fn list(&self, _path: &Path) -> Result<Vec<BackupHandle>, BackupError> {
        Ok(Vec::new())
    }

    fn restore(
        &self,
        handle: &BackupHandle,
        _target: &Path,
    ) -> Result<Option<BackupHandle>, BackupError> {
        Err(BackupError::SnapshotMissing(handle.snapshot_path().to_path_buf()))
    }
}
