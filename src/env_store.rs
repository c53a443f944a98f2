//! Flat `KEY=VALUE` environment files: the application-side credential mirror
//!
//! The application reads its manager login from an env file rather than
//! from manager.conf. This module finds that file, reads the mirrored keys
//! (`<PREFIX>_HOST`, `_PORT`, `_USERNAME`, `_SECRET`) and rewrites only the
//! keys that drifted, leaving comments, ordering and unrelated keys alone.
//!
//! When a key is assigned more than once, the last assignment wins (shell
//! semantics) and is the one rewritten.

use crate::backup::{sha256_hex, BackupHandle};
use crate::models::Credential;
use crate::utils::{atomic_write, EnvError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Names of the mirrored keys for a given prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvKeys {
    prefix: String,
}

impl EnvKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn host(&self) -> String {
        format!("{}_HOST", self.prefix)
    }

    pub fn port(&self) -> String {
        format!("{}_PORT", self.prefix)
    }

    pub fn username(&self) -> String {
        format!("{}_USERNAME", self.prefix)
    }

    pub fn secret(&self) -> String {
        format!("{}_SECRET", self.prefix)
    }

    fn pairs(&self, cred: &Credential) -> [(String, String); 4] {
        [
            (self.host(), cred.host().to_string()),
            (self.port(), cred.port().to_string()),
            (self.username(), cred.username().as_str().to_string()),
            (self.secret(), cred.secret().as_str().to_string()),
        ]
    }
}

#[derive(Debug, Clone)]
struct EnvLine {
    text: String,
    /// `\n`, `\r\n` or empty for a final unterminated line
    eol: String,
}

impl EnvLine {
    /// Key and raw value if this line is an assignment
    fn assignment(&self) -> Option<(&str, &str)> {
        let body = self.text.trim_start();
        if body.starts_with('#') {
            return None;
        }
        let body = body.strip_prefix("export ").unwrap_or(body).trim_start();
        let (key, value) = body.split_once('=')?;
        let key = key.trim_end();
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !key.starts_with(|c: char| c.is_ascii_digit());
        valid.then_some((key, value))
    }

    fn exported(&self) -> bool {
        self.text.trim_start().starts_with("export ")
    }
}

/// Parsed env file that preserves every line it does not rewrite
#[derive(Debug, Clone)]
pub struct EnvFile {
    lines: Vec<EnvLine>,
}

impl EnvFile {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .split_inclusive('\n')
            .map(|raw| {
                let (text, eol) = match raw.strip_suffix("\r\n") {
                    Some(t) => (t, "\r\n"),
                    None => match raw.strip_suffix('\n') {
                        Some(t) => (t, "\n"),
                        None => (raw, ""),
                    },
                };
                EnvLine {
                    text: text.to_string(),
                    eol: eol.to_string(),
                }
            })
            .collect();
        Self { lines }
    }

    pub fn serialize(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{}{}", l.text, l.eol))
            .collect()
    }

    /// Value of `key` with quotes and inline comments removed
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines
            .iter()
            .rev()
            .find_map(|l| l.assignment().filter(|(k, _)| *k == key))
            .map(|(_, v)| unquote(v))
    }

    /// Set `key`; returns `true` if the file changed
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        if self.get(key).as_deref() == Some(value) {
            return false;
        }

        let rendered_value = quote_if_needed(value);
        let existing = self
            .lines
            .iter()
            .rposition(|l| l.assignment().is_some_and(|(k, _)| k == key));

        match existing {
            Some(idx) => {
                let line = &mut self.lines[idx];
                let export = if line.exported() { "export " } else { "" };
                let indent_len = line.text.len() - line.text.trim_start().len();
                let indent = line.text[..indent_len].to_string();
                let comment = line
                    .assignment()
                    .map(|(_, raw)| trailing_comment(raw).to_string())
                    .unwrap_or_default();
                line.text = format!("{}{}{}={}{}", indent, export, key, rendered_value, comment);
            }
            None => {
                let eol = self
                    .lines
                    .iter()
                    .find(|l| !l.eol.is_empty())
                    .map(|l| l.eol.clone())
                    .unwrap_or_else(|| "\n".to_string());
                if let Some(last) = self.lines.last_mut() {
                    if last.eol.is_empty() {
                        last.eol = eol.clone();
                    }
                }
                self.lines.push(EnvLine {
                    text: format!("{}={}", key, rendered_value),
                    eol,
                });
            }
        }
        true
    }

    /// Mirrored keys whose value differs from `cred` (missing keys included)
    pub fn drift(&self, keys: &EnvKeys, cred: &Credential) -> Vec<String> {
        keys.pairs(cred)
            .into_iter()
            .filter(|(k, v)| self.get(k).as_deref() != Some(v.as_str()))
            .map(|(k, _)| k)
            .collect()
    }

    /// Write `cred` into the mirrored keys; returns the keys that changed
    pub fn apply_credential(&mut self, keys: &EnvKeys, cred: &Credential) -> Vec<String> {
        keys.pairs(cred)
            .into_iter()
            .filter_map(|(k, v)| self.set(&k, &v).then_some(k))
            .collect()
    }
}

/// Env file chosen for this run
#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// First existing candidate, in priority order
    pub fn discover(candidates: &[PathBuf]) -> Result<Self, EnvError> {
        candidates
            .iter()
            .find(|p| p.is_file())
            .map(|p| {
                tracing::debug!(path = %p.display(), "using environment mirror");
                Self::new(p.clone())
            })
            .ok_or(EnvError::NotFound(candidates.len()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<EnvFile, EnvError> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(EnvFile::parse(&text))
    }

    /// Replace the file; `backup` must snapshot its current content
    pub fn save(&self, file: &EnvFile, backup: &BackupHandle) -> Result<(), EnvError> {
        backup.ensure_covers(&self.path)?;
        let current = fs::read(&self.path).map_err(|e| self.io_error(e))?;
        if sha256_hex(&current) != backup.checksum() {
            return Err(crate::utils::BackupError::Stale(self.path.clone()).into());
        }

        atomic_write(&self.path, file.serialize().as_bytes()).map_err(|e| self.io_error(e))?;
        tracing::info!(path = %self.path.display(), "environment mirror written");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> EnvError {
        EnvError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    for q in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(q)
            .and_then(|rest| rest.rfind(q).map(|end| &rest[..end]))
        {
            return if q == '"' {
                inner.replace("\\\"", "\"").replace("\\\\", "\\")
            } else {
                inner.to_string()
            };
        }
    }
    match trimmed.find(" #") {
        Some(pos) => trimmed[..pos].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Inline ` # comment` after a raw value, leading whitespace included
fn trailing_comment(raw: &str) -> &str {
    let value = raw.trim_start();
    let offset = raw.len() - value.len();
    for q in ['"', '\''] {
        if let Some(end) = value.strip_prefix(q).and_then(|rest| rest.rfind(q)) {
            // Past the closing quote.
            let after = &raw[offset + end + 2..];
            return if after.trim_start().starts_with('#') { after } else { "" };
        }
    }
    match raw.find(" #") {
        Some(pos) => &raw[pos..],
        None => "",
    }
}

fn quote_if_needed(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '#' | '\\' | '$' | '`'));
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupStore, FsBackupStore};
    use crate::models::{SecureString, Username};
    use tempfile::tempdir;

    const SAMPLE: &str = "\
# application settings
APP_ENV=production
export ASTERISK_AMI_HOST=127.0.0.1
ASTERISK_AMI_PORT=5038 # default port
ASTERISK_AMI_USERNAME='admin'
ASTERISK_AMI_SECRET=\"old\"
";

    fn cred(secret: &str) -> Credential {
        Credential::new(
            Username::new("admin").unwrap(),
            SecureString::new(secret),
            "127.0.0.1",
            5038,
        )
    }

    #[test]
    fn reads_quoted_exported_and_commented_values() {
        let env = EnvFile::parse(SAMPLE);
        assert_eq!(env.get("ASTERISK_AMI_HOST").as_deref(), Some("127.0.0.1"));
        assert_eq!(env.get("ASTERISK_AMI_PORT").as_deref(), Some("5038"));
        assert_eq!(env.get("ASTERISK_AMI_USERNAME").as_deref(), Some("admin"));
        assert_eq!(env.get("ASTERISK_AMI_SECRET").as_deref(), Some("old"));
        assert_eq!(env.get("MISSING"), None);
        assert_eq!(env.serialize(), SAMPLE);
    }

    #[test]
    fn last_assignment_wins() {
        let env = EnvFile::parse("K=1\nK=2\n");
        assert_eq!(env.get("K").as_deref(), Some("2"));
    }

    #[test]
    fn consistent_mirror_has_no_drift() {
        let keys = EnvKeys::new("ASTERISK_AMI");
        let mut env = EnvFile::parse(SAMPLE);
        assert!(env.drift(&keys, &cred("old")).is_empty());
        assert!(env.apply_credential(&keys, &cred("old")).is_empty());
        assert_eq!(env.serialize(), SAMPLE);
    }

    #[test]
    fn apply_rewrites_only_drifted_keys() {
        let keys = EnvKeys::new("ASTERISK_AMI");
        let mut env = EnvFile::parse(SAMPLE);
        assert_eq!(env.drift(&keys, &cred("new")), vec!["ASTERISK_AMI_SECRET"]);

        let changed = env.apply_credential(&keys, &cred("new"));
        assert_eq!(changed, vec!["ASTERISK_AMI_SECRET"]);
        assert_eq!(env.serialize(), SAMPLE.replace("\"old\"", "new"));
    }

    #[test]
    fn set_keeps_export_and_appends_missing_keys() {
        let mut env = EnvFile::parse("export A=1");
        assert!(env.set("A", "two words"));
        assert!(env.set("B", "x"));
        assert_eq!(env.serialize(), "export A=\"two words\"\nB=x\n");
        assert_eq!(env.get("A").as_deref(), Some("two words"));
    }

    #[test]
    fn set_keeps_inline_comment() {
        let mut env = EnvFile::parse("SECRET=old # rotated by ops\nQUOTED=\"a b\"  # spaced\n");
        assert!(env.set("SECRET", "new"));
        assert!(env.set("QUOTED", "c"));
        assert_eq!(
            env.serialize(),
            "SECRET=new # rotated by ops\nQUOTED=c  # spaced\n"
        );
        assert_eq!(env.get("SECRET").as_deref(), Some("new"));
        assert_eq!(env.get("QUOTED").as_deref(), Some("c"));
    }

    #[test]
    fn discover_takes_first_existing_candidate() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("system.env");
        let project = dir.path().join("project.env");
        let local = dir.path().join("local.env");
        fs::write(&project, "A=1\n").unwrap();
        fs::write(&local, "A=2\n").unwrap();

        let store = EnvStore::discover(&[system.clone(), project.clone(), local]).unwrap();
        assert_eq!(store.path(), project.as_path());

        assert!(matches!(
            EnvStore::discover(&[system]),
            Err(EnvError::NotFound(1))
        ));
    }

    #[test]
    fn save_requires_current_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.env");
        fs::write(&path, SAMPLE).unwrap();
        let backups = FsBackupStore::new(dir.path().join("backups"), 0);
        let store = EnvStore::new(&path);

        let mut env = store.load().unwrap();
        env.set("ASTERISK_AMI_SECRET", "new");
        let handle = backups.backup(&path).unwrap();
        store.save(&env, &handle).unwrap();
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("ASTERISK_AMI_SECRET=new\n"));

        // The snapshot now describes the previous content.
        assert!(matches!(
            store.save(&env, &handle),
            Err(EnvError::Backup(crate::utils::BackupError::Stale(_)))
        ));
    }
}
