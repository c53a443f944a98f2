//! Protocol client against an in-process fake manager server

use amidoctor::core::{
    AmiClient, ListenTableProbe, PortProbe, ProbeMethod, ProtocolClient, ProtocolResult,
    TcpProbeResult,
};
use amidoctor::models::{Credential, SecureString, Username};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const BANNER: &str = "Asterisk Call Manager/9.0.0";

enum Reply {
    Success,
    Failure(&'static str),
    Silent,
}

/// Probe that trusts the caller; the fake server is always up
struct Listening;

#[async_trait]
impl PortProbe for Listening {
    async fn probe(&self, _host: &str, port: u16) -> TcpProbeResult {
        TcpProbeResult {
            port,
            ok: true,
            method: ProbeMethod::Connect,
            error: None,
        }
    }
}

async fn read_block(reader: &mut BufReader<TcpStream>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        lines.push(trimmed.to_string());
    }
    lines
}

/// Serve one connection; resolves to every request line received
async fn fake_manager(reply: Reply) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader
            .get_mut()
            .write_all(format!("{}\r\n", BANNER).as_bytes())
            .await
            .unwrap();

        let mut received = read_block(&mut reader).await;
        match reply {
            Reply::Success => {
                reader
                    .get_mut()
                    .write_all(b"Response: Success\r\nMessage: Authentication accepted\r\n\r\n")
                    .await
                    .unwrap();
                received.extend(read_block(&mut reader).await);
            }
            Reply::Failure(message) => {
                reader
                    .get_mut()
                    .write_all(format!("Response: Error\r\nMessage: {}\r\n\r\n", message).as_bytes())
                    .await
                    .unwrap();
            }
            Reply::Silent => tokio::time::sleep(Duration::from_secs(5)).await,
        }
        received
    });

    (port, handle)
}

fn credential(port: u16) -> Credential {
    Credential::new(
        Username::new("admin").unwrap(),
        SecureString::new("hunter2"),
        "127.0.0.1",
        port,
    )
}

#[tokio::test]
async fn successful_login_logs_off() {
    let (port, server) = fake_manager(Reply::Success).await;
    let client = AmiClient::new(Arc::new(Listening));

    let outcome = client.login(&credential(port), Duration::from_secs(2)).await;

    assert_eq!(outcome.result, ProtocolResult::Authenticated);
    assert_eq!(outcome.banner.as_deref(), Some(BANNER));
    assert!(outcome.raw.contains("Response: Success"));

    let received = server.await.unwrap();
    assert_eq!(
        received,
        vec![
            "Action: Login".to_string(),
            "Username: admin".to_string(),
            "Secret: hunter2".to_string(),
            "Action: Logoff".to_string(),
        ]
    );
}

#[tokio::test]
async fn rejected_login_is_auth_failed() {
    let (port, server) = fake_manager(Reply::Failure("Authentication failed")).await;
    let client = AmiClient::new(Arc::new(Listening));

    let outcome = client.login(&credential(port), Duration::from_secs(2)).await;

    assert_eq!(outcome.result, ProtocolResult::AuthFailed);
    assert!(outcome.raw.contains("Authentication failed"));
    // No logoff after a rejection.
    assert_eq!(server.await.unwrap().len(), 3);
}

#[tokio::test]
async fn echoed_secret_is_redacted() {
    let (port, server) = fake_manager(Reply::Failure("Authentication failed for hunter2")).await;
    let client = AmiClient::new(Arc::new(Listening));

    let outcome = client.login(&credential(port), Duration::from_secs(2)).await;

    assert_eq!(outcome.result, ProtocolResult::AuthFailed);
    assert!(!outcome.raw.contains("hunter2"));
    assert!(outcome.raw.contains("hu***"));
    server.await.unwrap();
}

#[tokio::test]
async fn silent_server_times_out() {
    let (port, server) = fake_manager(Reply::Silent).await;
    let client = AmiClient::new(Arc::new(Listening));

    let started = std::time::Instant::now();
    let outcome = client.login(&credential(port), Duration::from_millis(300)).await;

    assert_eq!(outcome.result, ProtocolResult::Timeout);
    assert_eq!(outcome.banner.as_deref(), Some(BANNER));
    assert!(started.elapsed() < Duration::from_secs(3));
    server.abort();
}

#[tokio::test]
async fn closed_port_is_unreachable_without_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = AmiClient::new(Arc::new(ListenTableProbe::new(Duration::from_millis(300))));
    let outcome = client.login(&credential(port), Duration::from_secs(1)).await;

    assert_eq!(outcome.result, ProtocolResult::Unreachable);
    assert!(outcome.banner.is_none());
}
