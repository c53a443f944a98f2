//! Manager interface protocol client
//!
//! Speaks just enough of the plaintext manager protocol to answer one
//! question: does this credential authenticate? A request and a response are
//! each a block of `Key: Value` lines with CRLF endings, terminated by a
//! blank line. The server greets every connection with a one-line banner
//! (`Asterisk Call Manager/x.y`).
//!
//! SECURITY: the secret is written to the socket and nowhere else. Captured
//! response text has a `Secret:` line or a standalone echo of the secret
//! replaced by its masked form.

use super::probe::PortProbe;
use crate::constants::AMI_CONNECT_TIMEOUT_MS;
use crate::models::{mask_secret, Credential};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

const LOGOFF_REQUEST: &[u8] = b"Action: Logoff\r\n\r\n";
const LOGOFF_TIMEOUT: Duration = Duration::from_millis(500);

/// Classification of one login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolResult {
    Authenticated,
    AuthFailed,
    Unreachable,
    Timeout,
}

impl fmt::Display for ProtocolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolResult::Authenticated => "authenticated",
            ProtocolResult::AuthFailed => "authentication failed",
            ProtocolResult::Unreachable => "unreachable",
            ProtocolResult::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

/// Result of a login attempt plus what the server said
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolOutcome {
    pub result: ProtocolResult,
    /// Response text with the secret redacted, or the reason no response
    /// was read
    pub raw: String,
    /// Greeting line sent by the server on connect
    pub banner: Option<String>,
}

impl ProtocolOutcome {
    fn without_response(result: ProtocolResult, reason: impl Into<String>) -> Self {
        Self {
            result,
            raw: reason.into(),
            banner: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.result == ProtocolResult::Authenticated
    }
}

impl fmt::Display for ProtocolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.result)
    }
}

/// Login seam used by the diagnostic controller
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Attempt to authenticate `credential`, bounded by `timeout` per phase
    async fn login(&self, credential: &Credential, timeout: Duration) -> ProtocolOutcome;
}

/// TCP client for the manager interface
pub struct AmiClient {
    probe: Arc<dyn PortProbe>,
    connect_timeout: Duration,
}

impl AmiClient {
    pub fn new(probe: Arc<dyn PortProbe>) -> Self {
        Self {
            probe,
            connect_timeout: Duration::from_millis(AMI_CONNECT_TIMEOUT_MS),
        }
    }

    /// Bound the TCP connect separately from the login exchange
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl ProtocolClient for AmiClient {
    async fn login(&self, credential: &Credential, limit: Duration) -> ProtocolOutcome {
        let host = credential.host();
        let port = credential.port();

        if !self.probe.is_listening(host, port).await {
            tracing::debug!(host, port, "port not listening, skipping login");
            return ProtocolOutcome::without_response(
                ProtocolResult::Unreachable,
                format!("port {} is not listening", port),
            );
        }

        let addr = socket_addr(host, port);
        let connect_limit = self.connect_timeout.min(limit);
        let stream = match timeout(connect_limit, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "connect failed");
                return ProtocolOutcome::without_response(
                    ProtocolResult::Unreachable,
                    format!("connect to {} failed: {}", addr, e),
                );
            }
            Err(_) => {
                return ProtocolOutcome::without_response(
                    ProtocolResult::Unreachable,
                    format!("connect to {} timed out after {:?}", addr, connect_limit),
                );
            }
        };

        let mut reader = BufReader::new(stream);
        let request = login_request(credential);
        match timeout(limit, reader.get_mut().write_all(request.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return ProtocolOutcome::without_response(
                    ProtocolResult::Unreachable,
                    format!("sending login failed: {}", e),
                );
            }
            Err(_) => {
                return ProtocolOutcome::without_response(
                    ProtocolResult::Timeout,
                    "sending login timed out",
                );
            }
        }

        let mut transcript = Transcript::default();
        match timeout(limit, read_response(&mut reader, &mut transcript)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "response read ended with error"),
            Err(_) => tracing::debug!(?limit, "response read timed out"),
        }

        let text = transcript.lines.join("\n");
        let result = classify_response(&text).unwrap_or(ProtocolResult::Timeout);

        if result == ProtocolResult::Authenticated {
            let stream = reader.get_mut();
            if timeout(LOGOFF_TIMEOUT, stream.write_all(LOGOFF_REQUEST))
                .await
                .is_err()
            {
                tracing::debug!("logoff timed out");
            }
            let _ = stream.shutdown().await;
        }

        tracing::info!(
            username = %credential.username(),
            secret = %credential.secret().masked(),
            host,
            port,
            %result,
            "manager login attempt"
        );

        ProtocolOutcome {
            result,
            raw: redact(&text, credential.secret().as_str()),
            banner: transcript.banner,
        }
    }
}

#[derive(Debug, Default)]
struct Transcript {
    banner: Option<String>,
    lines: Vec<String>,
}

/// Read one response block into `transcript`
///
/// Stops at the first blank line after at least one field, or at EOF.
/// Partial content stays in `transcript` if the future is dropped.
async fn read_response(
    reader: &mut BufReader<TcpStream>,
    transcript: &mut Transcript,
) -> io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if transcript.lines.is_empty() {
                continue;
            }
            return Ok(());
        }
        if transcript.banner.is_none() && transcript.lines.is_empty() && !trimmed.contains(':') {
            transcript.banner = Some(trimmed.to_string());
            continue;
        }
        transcript.lines.push(trimmed.to_string());
    }
}

fn login_request(credential: &Credential) -> String {
    format!(
        "Action: Login\r\nUsername: {}\r\nSecret: {}\r\n\r\n",
        credential.username(),
        credential.secret().as_str()
    )
}

fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Classify response text, `None` when it holds no conclusive token
///
/// A rejection is checked first: some servers answer
/// `Response: Error` / `Message: Authentication failed`, and the word
/// "success" must not be matched out of an unrelated message.
pub fn classify_response(text: &str) -> Option<ProtocolResult> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("authentication failed") {
        return Some(ProtocolResult::AuthFailed);
    }
    let success = text.lines().any(|line| {
        line.split_once(':').is_some_and(|(key, value)| {
            key.trim().eq_ignore_ascii_case("response")
                && value.trim().eq_ignore_ascii_case("success")
        })
    });
    if success {
        return Some(ProtocolResult::Authenticated);
    }
    None
}

/// Mask the secret in a captured transcript
///
/// A `Secret:` line has its whole value masked. Elsewhere only standalone
/// occurrences are masked: `pw` inside `pwuser` is left alone.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    let masked = mask_secret(secret);
    text.split_inclusive('\n')
        .map(|line| redact_line(line, secret, &masked))
        .collect()
}

fn redact_line(line: &str, secret: &str, masked: &str) -> String {
    let body = line.trim_end_matches(['\r', '\n']);
    let eol = &line[body.len()..];
    if let Some((key, _)) = body.split_once(':') {
        if key.trim().eq_ignore_ascii_case("secret") {
            return format!("{}: {}{}", key, masked, eol);
        }
    }

    let standalone = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut prev = None;
    while let Some(pos) = rest.find(secret) {
        let before = rest[..pos].chars().next_back().or(prev);
        let tail = &rest[pos + secret.len()..];
        out.push_str(&rest[..pos]);
        if standalone(before) && standalone(tail.chars().next()) {
            out.push_str(masked);
        } else {
            out.push_str(secret);
        }
        prev = secret.chars().next_back();
        rest = tail;
    }
    out.push_str(rest);
    out
}
