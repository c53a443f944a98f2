//! Domain model types for amidoctor
//!
//! SECURITY: Credential types implement Drop to clear sensitive data.

use crate::utils::CredentialError;
use serde::Serialize;
use std::fmt;

/// Manager-interface username
///
/// The username doubles as the name of its section in manager.conf, so it
/// must be representable as a `[section]` header: non-empty, no brackets,
/// no whitespace, no comment characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Create a new username after validation
    pub fn new(username: impl Into<String>) -> Result<Self, CredentialError> {
        let username = username.into();

        if username.is_empty() {
            return Err(CredentialError::InvalidUsername(
                "Username cannot be empty".to_string(),
            ));
        }

        if username.len() > 80 {
            return Err(CredentialError::InvalidUsername(
                "Username exceeds maximum length (80)".to_string(),
            ));
        }

        if username
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '[' | ']' | ';' | '#' | '='))
        {
            return Err(CredentialError::InvalidUsername(format!(
                "'{}' cannot be used as a section name",
                username
            )));
        }

        Ok(Username(username))
    }

    /// Get the username as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Username {
    type Error = CredentialError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Username::new(value)
    }
}

/// Secret that zeros memory on drop
///
/// SECURITY: This type never implements Display or Debug in a way that reveals the secret.
pub struct SecureString(String);

impl Clone for SecureString {
    fn clone(&self) -> Self {
        SecureString(self.0.clone())
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecureString {}

impl SecureString {
    /// Create a new secure string
    pub fn new(secret: impl Into<String>) -> Self {
        SecureString(secret.into())
    }

    /// Get the secret as a string slice
    ///
    /// Use this sparingly: only for the wire request and file writes.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form safe to log or print
    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        // SAFETY: We own this String and are zeroing it before drop; zero
        // bytes are valid UTF-8.
        unsafe {
            let bytes = self.0.as_bytes_mut();
            for byte in bytes {
                std::ptr::write_volatile(byte, 0);
            }
        }
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SECURITY: Never reveal the secret content
        write!(f, "SecureString(*** {} bytes ***)", self.0.len())
    }
}

impl Serialize for SecureString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.masked())
    }
}

/// Masked prefix of a secret: the first two characters followed by `***`
///
/// Secrets of four characters or fewer are fully masked.
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(2).collect();
    format!("{}***", prefix)
}

/// Manager-interface login derived from manager.conf
///
/// Never persisted as its own entity; only mirrored into the environment
/// file. `Serialize` emits the masked secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Credential {
    username: Username,
    secret: SecureString,
    host: String,
    port: u16,
}

impl Credential {
    pub fn new(username: Username, secret: SecureString, host: impl Into<String>, port: u16) -> Self {
        Credential {
            username,
            secret,
            host: host.into(),
            port,
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn secret(&self) -> &SecureString {
        &self.secret
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} (secret {})",
            self.username,
            self.host,
            self.port,
            self.secret.masked()
        )
    }
}
