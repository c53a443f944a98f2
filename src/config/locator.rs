//! Locating the active manager credential in manager.conf
//!
//! Which identity is canonical when several user sections exist is a
//! first-match policy: the first section in document order, other than the
//! reserved general section, that carries a `secret` key.

use super::document::ConfigDocument;
use crate::constants::{DEFAULT_AMI_HOST, DEFAULT_AMI_PORT};
use crate::models::{Credential, SecureString, Username};
use crate::utils::CredentialError;

/// Name of the first section that qualifies as the credential section
pub fn locate_section(doc: &ConfigDocument, reserved_section: &str) -> Option<String> {
    doc.sections()
        .filter(|name| *name != reserved_section)
        .find(|name| {
            if doc.get_value(name, "secret").is_none() {
                return false;
            }
            if Username::new(*name).is_err() {
                tracing::warn!(section = %name, "skipping section unusable as a username");
                return false;
            }
            true
        })
        .map(str::to_string)
}

/// Derive the canonical credential from `doc`
///
/// The username is the section name and the secret its `secret` value with
/// any inline comment removed. Host and port come from the reserved section
/// (`bindaddr`, `port`); a wildcard or missing `bindaddr` means loopback.
pub fn locate(doc: &ConfigDocument, reserved_section: &str) -> Result<Credential, CredentialError> {
    let section = locate_section(doc, reserved_section).ok_or(CredentialError::SecretNotFound)?;
    let secret = doc
        .get_value(&section, "secret")
        .ok_or(CredentialError::SecretNotFound)?;
    let (host, port) = endpoint(doc, reserved_section);

    let credential = Credential::new(
        Username::new(section)?,
        SecureString::new(secret.trim()),
        host,
        port,
    );
    tracing::debug!(credential = %credential, "located manager credential");
    Ok(credential)
}

/// Host and port the manager interface listens on according to `doc`
pub fn endpoint(doc: &ConfigDocument, reserved_section: &str) -> (String, u16) {
    let port = doc
        .get_value(reserved_section, "port")
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|&p| p != 0)
        .unwrap_or(DEFAULT_AMI_PORT);

    let host = match doc.get_value(reserved_section, "bindaddr") {
        Some(addr) if !is_wildcard(addr.trim()) => addr.trim().to_string(),
        _ => DEFAULT_AMI_HOST.to_string(),
    };
    (host, port)
}

/// Whether the manager interface is switched on in `doc`
pub fn is_enabled(doc: &ConfigDocument, reserved_section: &str) -> bool {
    doc.get_value(reserved_section, "enabled")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_wildcard(addr: &str) -> bool {
    addr.is_empty() || matches!(addr, "0.0.0.0" | "::" | "[::]" | "*")
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "on" | "1" | "y" | "t"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_first_section_with_secret() {
        let doc = ConfigDocument::parse_str(
            "[general]\nenabled = yes\n\n[admin]\nsecret = hunter2\n\n[crm]\nsecret = other\n",
        );
        let cred = locate(&doc, "general").unwrap();
        assert_eq!(cred.username().as_str(), "admin");
        assert_eq!(cred.secret().as_str(), "hunter2");
        assert_eq!(cred.host(), "127.0.0.1");
        assert_eq!(cred.port(), 5038);
    }

    #[test]
    fn skips_sections_without_secret_and_commented_secrets() {
        let doc = ConfigDocument::parse_str(
            "[general]\nsecret = nope\n[monitor]\n;secret = old\nread = all\n[app]\nsecret = s3 ; note\n",
        );
        let cred = locate(&doc, "general").unwrap();
        assert_eq!(cred.username().as_str(), "app");
        assert_eq!(cred.secret().as_str(), "s3");
    }

    #[test]
    fn missing_secret_is_an_error() {
        let doc = ConfigDocument::parse_str("[general]\nenabled = yes\n[admin]\nread = all\n");
        assert!(matches!(
            locate(&doc, "general"),
            Err(CredentialError::SecretNotFound)
        ));
    }

    #[test]
    fn endpoint_uses_general_section() {
        let doc = ConfigDocument::parse_str("[general]\nport = 15038\nbindaddr = 10.0.0.5\n");
        assert_eq!(endpoint(&doc, "general"), ("10.0.0.5".to_string(), 15038));

        let wildcard = ConfigDocument::parse_str("[general]\nport = junk\nbindaddr = 0.0.0.0\n");
        assert_eq!(endpoint(&wildcard, "general"), ("127.0.0.1".to_string(), 5038));
    }

    #[test]
    fn enabled_accepts_asterisk_truthy_values() {
        for v in ["yes", "Yes", "true", "on", "1"] {
            let doc = ConfigDocument::parse_str(&format!("[general]\nenabled = {}\n", v));
            assert!(is_enabled(&doc, "general"), "{}", v);
        }
        let off = ConfigDocument::parse_str("[general]\nenabled = no\n");
        assert!(!is_enabled(&off, "general"));
        let commented = ConfigDocument::parse_str("[general]\n;enabled = yes\n");
        assert!(!is_enabled(&commented, "general"));
    }
}
