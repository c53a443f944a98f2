//! Cheap local check of whether the manager port is listening
//!
//! On Linux the kernel's socket tables (`/proc/net/tcp`, `/proc/net/tcp6`)
//! answer the question without touching the service at all. When those are
//! unavailable, or the host is not local, a bounded TCP connect is used
//! instead.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const PROC_TCP_TABLES: &[&str] = &["/proc/net/tcp", "/proc/net/tcp6"];
const TCP_STATE_LISTEN: &str = "0A";

/// How a probe reached its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    ListenTable,
    Connect,
}

/// Result of probing one TCP port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpProbeResult {
    /// Port that was probed
    pub port: u16,
    /// Whether something is listening
    pub ok: bool,
    pub method: ProbeMethod,
    /// Optional error detail when the probe failed
    pub error: Option<String>,
}

/// Port probe seam, replaceable in tests
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> TcpProbeResult;

    async fn is_listening(&self, host: &str, port: u16) -> bool {
        self.probe(host, port).await.ok
    }
}

/// Kernel listen-table probe with a TCP-connect fallback
#[derive(Debug, Clone)]
pub struct ListenTableProbe {
    connect_timeout: Duration,
}

impl ListenTableProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn listen_table_ports() -> Option<Vec<u16>> {
        let mut ports = Vec::new();
        let mut any_table = false;
        for table in PROC_TCP_TABLES {
            if let Ok(raw) = tokio::fs::read_to_string(table).await {
                any_table = true;
                ports.extend(parse_listen_ports(&raw));
            }
        }
        any_table.then_some(ports)
    }

    async fn connect_probe(&self, host: &str, port: u16) -> TcpProbeResult {
        let targets: Vec<String> = if host.eq_ignore_ascii_case("localhost") {
            vec![format!("127.0.0.1:{}", port), format!("[::1]:{}", port)]
        } else if host.contains(':') && !host.starts_with('[') {
            vec![format!("[{}]:{}", host, port)]
        } else {
            vec![format!("{}:{}", host, port)]
        };

        let attempts = targets.iter().map(|target| async move {
            match timeout(self.connect_timeout, TcpStream::connect(target.as_str())).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("TCP probe timed out".to_string()),
            }
        });
        let results = join_all(attempts).await;

        let ok = results.iter().any(Result::is_ok);
        let error = if ok {
            None
        } else {
            results.into_iter().find_map(Result::err)
        };
        TcpProbeResult {
            port,
            ok,
            method: ProbeMethod::Connect,
            error,
        }
    }
}

impl Default for ListenTableProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::constants::TCP_PROBE_TIMEOUT_MS))
    }
}

#[async_trait]
impl PortProbe for ListenTableProbe {
    async fn probe(&self, host: &str, port: u16) -> TcpProbeResult {
        if is_local(host) {
            if let Some(ports) = Self::listen_table_ports().await {
                let ok = ports.contains(&port);
                tracing::debug!(port, ok, "listen-table probe");
                return TcpProbeResult {
                    port,
                    ok,
                    method: ProbeMethod::ListenTable,
                    error: (!ok).then(|| format!("no socket listening on port {}", port)),
                };
            }
        }

        let result = self.connect_probe(host, port).await;
        tracing::debug!(host, port, ok = result.ok, "connect probe");
        result
    }
}

/// Ports in LISTEN state in a `/proc/net/tcp`-format table
pub fn parse_listen_ports(table: &str) -> Vec<u16> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if state != TCP_STATE_LISTEN {
                return None;
            }
            let (_, port_hex) = local.rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

fn is_local(host: &str) -> bool {
    matches!(
        host.trim_matches(|c| c == '[' || c == ']'),
        "localhost" | "::1" | "0.0.0.0" | "::"
    ) || host.starts_with("127.")
}
