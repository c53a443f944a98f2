//! Control of the PBX service process
//!
//! The controller only needs four verbs from the service manager. The
//! default implementation shells out to `systemctl` and to the PBX's own
//! remote console (`asterisk -rx`), each bounded by a timeout so a wedged
//! service manager cannot hang a run.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Service lifecycle seam
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Whether the service process is running
    async fn is_active(&self) -> bool;

    async fn start(&self) -> Result<(), String>;

    /// Ask the running service to re-read the manager configuration
    async fn reload(&self) -> Result<(), String>;

    async fn restart(&self) -> Result<(), String>;
}

/// `systemctl` unit plus PBX console, the usual Linux deployment
#[derive(Debug, Clone)]
pub struct SystemdService {
    unit: String,
    pbx_cli: String,
    command_timeout: Duration,
}

impl SystemdService {
    pub fn new(unit: impl Into<String>, pbx_cli: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            unit: unit.into(),
            pbx_cli: pbx_cli.into(),
            command_timeout,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<(), String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| format!("Failed to start {}: {}", program, e))?;

        let output = timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("{} {} timed out", program, args.join(" ")))?
            .map_err(|e| format!("Failed to execute {}: {}", program, e))?;

        if output.status.success() {
            tracing::debug!(program, args = %args.join(" "), "command succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(format!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                detail
            ))
        }
    }
}

impl Default for SystemdService {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_SERVICE_UNIT,
            crate::constants::DEFAULT_PBX_CLI,
            Duration::from_secs(crate::constants::SERVICE_COMMAND_TIMEOUT_SECS),
        )
    }
}

#[async_trait]
impl ServiceController for SystemdService {
    async fn is_active(&self) -> bool {
        self.run("systemctl", &["is-active", "--quiet", &self.unit])
            .await
            .is_ok()
    }

    async fn start(&self) -> Result<(), String> {
        tracing::info!(unit = %self.unit, "starting service");
        self.run("systemctl", &["start", &self.unit]).await
    }

    async fn reload(&self) -> Result<(), String> {
        tracing::info!(unit = %self.unit, "reloading manager configuration");
        match self.run(&self.pbx_cli, &["-rx", "manager reload"]).await {
            Ok(()) => Ok(()),
            Err(console) => {
                tracing::warn!(error = %console, "console reload failed, falling back to systemctl");
                self.run("systemctl", &["reload", &self.unit]).await
            }
        }
    }

    async fn restart(&self) -> Result<(), String> {
        tracing::info!(unit = %self.unit, "restarting service");
        self.run("systemctl", &["restart", &self.unit]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_reported_not_panicked() {
        let service = SystemdService::new(
            "nonexistent-unit",
            "/nonexistent/amidoctor-pbx-cli",
            Duration::from_secs(2),
        );
        let err = service
            .run("/nonexistent/amidoctor-pbx-cli", &["-rx", "manager reload"])
            .await
            .unwrap_err();
        assert!(err.contains("Failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_output() {
        let service = SystemdService::default();
        let err = service
            .run("sh", &["-c", "echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        assert!(err.contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let service = SystemdService::new("x", "x", Duration::from_millis(100));
        let err = service.run("sleep", &["5"]).await.unwrap_err();
        assert!(err.contains("timed out"));
    }
}
