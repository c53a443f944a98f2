//! Known-good manager configuration
//!
//! What "fixed" means for manager.conf: the interface enabled on loopback,
//! and one user section whose secret we know, with an ACL that admits local
//! clients and read/write permission sets. Existing custom ACLs survive
//! unless [`AclPolicy::Reset`] is asked for.
//!
//! The repaired user section is also made the one the locator picks, so
//! the next run tests the same identity this one wrote.

use crate::config::{locate_section, ConfigDocument};
use crate::constants::{
    DEFAULT_ACL_DENY, DEFAULT_ACL_PERMIT, DEFAULT_AMI_HOST, DEFAULT_AMI_PERMISSIONS,
};
use crate::models::SecureString;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// What to do with `deny`/`permit` lines already in the user section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclPolicy {
    /// Keep existing ACL lines; add the localhost pair only if there are none
    #[default]
    Preserve,
    /// Drop existing ACL lines and write the localhost pair
    Reset,
}

/// Where the secret written by a remediation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Explicit,
    EnvMirror,
    Existing,
    Generated,
}

/// Pick the secret to write: explicit, then env mirror, then existing, then fresh
pub fn choose_secret(
    explicit: Option<&str>,
    env_mirror: Option<&str>,
    existing: Option<&str>,
    generated_len: usize,
) -> (SecureString, SecretSource) {
    fn usable(s: Option<&str>) -> Option<&str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    if let Some(s) = usable(explicit) {
        (SecureString::new(s), SecretSource::Explicit)
    } else if let Some(s) = usable(env_mirror) {
        (SecureString::new(s), SecretSource::EnvMirror)
    } else if let Some(s) = usable(existing) {
        (SecureString::new(s), SecretSource::Existing)
    } else {
        (SecureString::new(generate_secret(generated_len)), SecretSource::Generated)
    }
}

/// Random alphanumeric secret
pub fn generate_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Rewrite `doc` to the known-good shape
///
/// Returns a short description of each change made; empty when the
/// document already matched.
pub fn apply_known_good(
    doc: &mut ConfigDocument,
    reserved_section: &str,
    username: &str,
    secret: &SecureString,
    port: u16,
    policy: AclPolicy,
) -> Vec<String> {
    let mut changes = Vec::new();
    let port = port.to_string();
    for (key, value) in [("enabled", "yes"), ("port", port.as_str()), ("bindaddr", DEFAULT_AMI_HOST)] {
        record(&mut changes, doc, reserved_section, key, value, value);
    }

    record(&mut changes, doc, username, "secret", secret.as_str(), &secret.masked());

    let has_acl = doc.get_value(username, "deny").is_some() || doc.get_value(username, "permit").is_some();
    match policy {
        AclPolicy::Preserve if has_acl => {}
        AclPolicy::Preserve => write_localhost_acl(&mut changes, doc, username),
        AclPolicy::Reset => {
            let removed = doc.remove_key(username, "deny") + doc.remove_key(username, "permit");
            if removed > 0 {
                changes.push(format!("[{}] removed {} ACL line(s)", username, removed));
            }
            write_localhost_acl(&mut changes, doc, username);
        }
    }

    for key in ["read", "write"] {
        if doc.get_value(username, key).is_none() {
            record(&mut changes, doc, username, key, DEFAULT_AMI_PERMISSIONS, DEFAULT_AMI_PERMISSIONS);
        }
    }

    if doc.normalize_order(username, &["deny", "permit"]) {
        changes.push(format!("[{}] deny moved before permit", username));
    }

    if let Some(first) = locate_section(doc, reserved_section).filter(|s| s != username) {
        if doc.move_section_before(username, &first) {
            changes.push(format!("[{}] moved ahead of [{}]", username, first));
        }
    }

    changes
}

fn write_localhost_acl(changes: &mut Vec<String>, doc: &mut ConfigDocument, username: &str) {
    record(changes, doc, username, "deny", DEFAULT_ACL_DENY, DEFAULT_ACL_DENY);
    record(changes, doc, username, "permit", DEFAULT_ACL_PERMIT, DEFAULT_ACL_PERMIT);
}

/// `set_value`, noting the change with `shown` in place of the value
fn record(
    changes: &mut Vec<String>,
    doc: &mut ConfigDocument,
    section: &str,
    key: &str,
    value: &str,
    shown: &str,
) {
    if doc.set_value(section, key, value) {
        changes.push(format!("[{}] {} = {}", section, key, shown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecureString {
        SecureString::new(s)
    }

    #[test]
    fn secret_precedence() {
        let (s, src) = choose_secret(Some("cli"), Some("env"), Some("conf"), 24);
        assert_eq!((s.as_str(), src), ("cli", SecretSource::Explicit));

        let (s, src) = choose_secret(None, Some("env"), Some("conf"), 24);
        assert_eq!((s.as_str(), src), ("env", SecretSource::EnvMirror));

        let (s, src) = choose_secret(Some("  "), None, Some("conf"), 24);
        assert_eq!((s.as_str(), src), ("conf", SecretSource::Existing));

        let (s, src) = choose_secret(None, None, None, 24);
        assert_eq!(src, SecretSource::Generated);
        assert_eq!(s.len(), 24);
        assert!(s.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn repairs_empty_document() {
        let mut doc = ConfigDocument::parse_str("");
        let changes = apply_known_good(&mut doc, "general", "admin", &secret("pw"), 5038, AclPolicy::Preserve);
        assert!(!changes.is_empty());
        assert!(changes.iter().all(|c| !c.contains("= pw")));

        assert_eq!(doc.get_value("general", "enabled").as_deref(), Some("yes"));
        assert_eq!(doc.get_value("general", "port").as_deref(), Some("5038"));
        assert_eq!(doc.get_value("general", "bindaddr").as_deref(), Some("127.0.0.1"));
        assert_eq!(doc.get_value("admin", "secret").as_deref(), Some("pw"));
        assert_eq!(doc.get_value("admin", "read").as_deref(), Some(DEFAULT_AMI_PERMISSIONS));

        let keys: Vec<&str> = doc.entries("admin").into_iter().map(|(k, _)| k).collect();
        let deny = keys.iter().position(|k| *k == "deny").unwrap();
        let permit = keys.iter().position(|k| *k == "permit").unwrap();
        assert!(deny < permit);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut doc = ConfigDocument::parse_str("[general]\nenabled = no\n\n[admin]\nsecret = old\n");
        apply_known_good(&mut doc, "general", "admin", &secret("new"), 5038, AclPolicy::Preserve);
        let once = doc.serialize();
        let changes = apply_known_good(&mut doc, "general", "admin", &secret("new"), 5038, AclPolicy::Preserve);
        assert!(changes.is_empty());
        assert_eq!(doc.serialize(), once);
    }

    #[test]
    fn preserve_keeps_custom_acl() {
        let mut doc = ConfigDocument::parse_str(
            "[general]\nenabled = yes\n[admin]\nsecret = s\npermit = 10.0.0.0/255.0.0.0\ndeny = 0.0.0.0/0.0.0.0\nread = all\nwrite = all\n",
        );
        apply_known_good(&mut doc, "general", "admin", &secret("s"), 5038, AclPolicy::Preserve);
        assert_eq!(doc.get_value("admin", "permit").as_deref(), Some("10.0.0.0/255.0.0.0"));
        let text = doc.to_string_lossy();
        assert!(text.find("deny").unwrap() < text.find("permit").unwrap());
        assert_eq!(doc.get_value("admin", "read").as_deref(), Some("all"));
    }

    #[test]
    fn reset_replaces_custom_acl() {
        let mut doc = ConfigDocument::parse_str(
            "[admin]\nsecret = s\npermit = 10.0.0.0/255.0.0.0\npermit = 192.168.0.0/255.255.0.0\n",
        );
        apply_known_good(&mut doc, "general", "admin", &secret("s"), 5038, AclPolicy::Reset);
        let permits: Vec<String> = doc
            .entries("admin")
            .into_iter()
            .filter(|(k, _)| *k == "permit")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(permits, vec![DEFAULT_ACL_PERMIT.to_string()]);
        assert_eq!(doc.get_value("admin", "deny").as_deref(), Some(DEFAULT_ACL_DENY));
    }

    #[test]
    fn repaired_user_becomes_the_located_one() {
        let mut doc = ConfigDocument::parse_str(
            "[general]\nenabled = yes\n\n[admin]\nsecret = old\n",
        );
        let changes = apply_known_good(&mut doc, "general", "bob", &secret("pw"), 5038, AclPolicy::Preserve);

        assert!(changes.iter().any(|c| c == "[bob] moved ahead of [admin]"));
        assert_eq!(locate_section(&doc, "general").as_deref(), Some("bob"));
        // The other user is kept as it was.
        assert_eq!(doc.get_value("admin", "secret").as_deref(), Some("old"));

        let again = apply_known_good(&mut doc, "general", "bob", &secret("pw"), 5038, AclPolicy::Preserve);
        assert!(again.is_empty());
    }
}
