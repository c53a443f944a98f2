//! Content-addressed snapshots of managed files
//!
//! Every file amidoctor mutates is snapshotted here first. Snapshots are
//! named `<file>--<pathkey>--<timestamp>--<sha256>.bak`, so the directory
//! listing alone is the index: no manifest to corrupt, and two sources that
//! share a file name (`/etc/asterisk/manager.conf`, `/tmp/manager.conf`)
//! never collide.
//!
//! For a given source, no two snapshots share a checksum. Backing up
//! unchanged content returns the existing handle.

use crate::constants::MAX_BACKUP_FILE_SIZE;
use crate::utils::{atomic_write, BackupError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SNAPSHOT_EXT: &str = "bak";
const FIELD_SEP: &str = "--";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Reference to one snapshot of one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupHandle {
    source_path: PathBuf,
    snapshot_path: PathBuf,
    checksum: String,
    timestamp: DateTime<Utc>,
}

impl BackupHandle {
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Hex SHA-256 of the snapshot content
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Fail unless this handle is a snapshot of `target`
    ///
    /// Writers call this before replacing a file: a snapshot of some other
    /// file is no permission to mutate this one.
    pub fn ensure_covers(&self, target: &Path) -> Result<(), BackupError> {
        if self.source_path == absolute(target) {
            Ok(())
        } else {
            Err(BackupError::Mismatch {
                handle: self.source_path.clone(),
                target: target.to_path_buf(),
            })
        }
    }
}

/// Snapshot store used before every mutation
pub trait BackupStore: Send + Sync {
    /// Snapshot `path`, or return the existing snapshot of identical content
    fn backup(&self, path: &Path) -> Result<BackupHandle, BackupError>;

    /// Snapshots of `path`, most recent first
    fn list(&self, path: &Path) -> Result<Vec<BackupHandle>, BackupError>;

    /// Overwrite `target` with the snapshot content
    ///
    /// The pre-restore state of `target` is snapshotted first; its handle is
    /// returned when `target` existed.
    fn restore(
        &self,
        handle: &BackupHandle,
        target: &Path,
    ) -> Result<Option<BackupHandle>, BackupError>;
}

/// Snapshot store backed by a directory
#[derive(Debug, Clone)]
pub struct FsBackupStore {
    dir: PathBuf,
    retention: usize,
}

impl FsBackupStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete the oldest snapshots of `path` beyond `keep`
    ///
    /// Returns the number of snapshots removed. Failures to delete are
    /// logged, not returned: pruning never blocks a run.
    pub fn prune(&self, path: &Path, keep: usize) -> Result<usize, BackupError> {
        let snapshots = self.list(path)?;
        let mut deleted = 0;
        for old in snapshots.iter().skip(keep) {
            match fs::remove_file(&old.snapshot_path) {
                Ok(()) => {
                    deleted += 1;
                    tracing::debug!(snapshot = %old.snapshot_path.display(), "pruned old snapshot");
                }
                Err(e) => tracing::warn!(
                    snapshot = %old.snapshot_path.display(),
                    error = %e,
                    "failed to prune snapshot"
                ),
            }
        }
        if deleted > 0 {
            tracing::info!(
                source = %path.display(),
                deleted,
                kept = keep,
                "cleaned up old snapshots"
            );
        }
        Ok(deleted)
    }

    fn snapshot_name(source: &Path, timestamp: DateTime<Utc>, checksum: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}.{}",
            file_name(source),
            path_key(source),
            timestamp.format(TIMESTAMP_FORMAT),
            checksum,
            SNAPSHOT_EXT,
            sep = FIELD_SEP
        )
    }

    fn parse_snapshot(&self, source: &Path, entry_name: &str) -> Option<BackupHandle> {
        let stem = entry_name.strip_suffix(&format!(".{}", SNAPSHOT_EXT))?;
        let mut fields = stem.rsplitn(4, FIELD_SEP);
        let checksum = fields.next()?;
        let stamp = fields.next()?;
        let key = fields.next()?;
        let name = fields.next()?;

        if name != file_name(source) || key != path_key(source) {
            return None;
        }
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();

        Some(BackupHandle {
            source_path: source.to_path_buf(),
            snapshot_path: self.dir.join(entry_name),
            checksum: checksum.to_string(),
            timestamp,
        })
    }

    fn prepare_dir(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.dir).map_err(|source| BackupError::Io {
            path: self.dir.clone(),
            source,
        })?;
        restrict_permissions(&self.dir, 0o700);
        Ok(())
    }
}

impl BackupStore for FsBackupStore {
    fn backup(&self, path: &Path) -> Result<BackupHandle, BackupError> {
        let source = absolute(path);
        let meta = fs::metadata(&source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::SourceNotFound(source.clone()),
            _ => BackupError::Io {
                path: source.clone(),
                source: e,
            },
        })?;
        if meta.len() > MAX_BACKUP_FILE_SIZE {
            return Err(BackupError::TooLarge {
                path: source,
                size: meta.len(),
            });
        }

        let content = fs::read(&source).map_err(|e| BackupError::Io {
            path: source.clone(),
            source: e,
        })?;
        let checksum = sha256_hex(&content);

        if let Some(existing) = self
            .list(&source)?
            .into_iter()
            .find(|h| h.checksum == checksum)
        {
            tracing::debug!(
                source = %source.display(),
                snapshot = %existing.snapshot_path.display(),
                "content unchanged; reusing snapshot"
            );
            return Ok(existing);
        }

        self.prepare_dir()?;
        let timestamp = Utc::now();
        let snapshot_path = self
            .dir
            .join(Self::snapshot_name(&source, timestamp, &checksum));
        atomic_write(&snapshot_path, &content).map_err(|e| BackupError::Io {
            path: snapshot_path.clone(),
            source: e,
        })?;
        restrict_permissions(&snapshot_path, 0o600);

        tracing::info!(
            source = %source.display(),
            snapshot = %snapshot_path.display(),
            "snapshot taken"
        );

        let handle = BackupHandle {
            source_path: source.clone(),
            snapshot_path,
            checksum,
            // Round-trip through the file name so handles compare equal to listed ones.
            timestamp: NaiveDateTime::parse_from_str(
                &timestamp.format(TIMESTAMP_FORMAT).to_string(),
                TIMESTAMP_FORMAT,
            )
            .map(|t| t.and_utc())
            .unwrap_or(timestamp),
        };

        if self.retention > 0 {
            self.prune(&source, self.retention)?;
        }
        Ok(handle)
    }

    fn list(&self, path: &Path) -> Result<Vec<BackupHandle>, BackupError> {
        let source = absolute(path);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::Io {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut handles: Vec<BackupHandle> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                self.parse_snapshot(&source, &name)
            })
            .collect();

        handles.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.snapshot_path.cmp(&a.snapshot_path))
        });
        Ok(handles)
    }

    fn restore(
        &self,
        handle: &BackupHandle,
        target: &Path,
    ) -> Result<Option<BackupHandle>, BackupError> {
        let content = fs::read(&handle.snapshot_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::SnapshotMissing(handle.snapshot_path.clone()),
            _ => BackupError::Io {
                path: handle.snapshot_path.clone(),
                source: e,
            },
        })?;
        if sha256_hex(&content) != handle.checksum {
            return Err(BackupError::ChecksumMismatch(handle.snapshot_path.clone()));
        }

        let pre_restore = match self.backup(target) {
            Ok(h) => Some(h),
            Err(BackupError::SourceNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        atomic_write(target, &content).map_err(|e| BackupError::Io {
            path: target.to_path_buf(),
            source: e,
        })?;
        tracing::info!(
            target = %target.display(),
            snapshot = %handle.snapshot_path.display(),
            "restored snapshot"
        );
        Ok(pre_restore)
    }
}

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

fn path_key(path: &Path) -> String {
    sha256_hex(path.to_string_lossy().as_bytes())[..8].to_string()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        tracing::warn!(path = %path.display(), error = %e, "failed to restrict permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, FsBackupStore, PathBuf) {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::new(dir.path().join("backups"), 0);
        let source = dir.path().join("manager.conf");
        fs::write(&source, "[general]\nenabled = yes\n").unwrap();
        (dir, store, source)
    }

    fn snapshot_count(store: &FsBackupStore) -> usize {
        fs::read_dir(store.dir()).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn missing_source_is_reported() {
        let (dir, store, _) = setup();
        let err = store.backup(&dir.path().join("nope.conf")).unwrap_err();
        assert!(matches!(err, BackupError::SourceNotFound(_)));
        assert_eq!(snapshot_count(&store), 0);
    }

    #[test]
    fn unchanged_content_is_deduplicated() {
        let (_dir, store, source) = setup();
        let first = store.backup(&source).unwrap();
        let second = store.backup(&source).unwrap();
        assert_eq!(first, second);
        assert_eq!(snapshot_count(&store), 1);
        assert_eq!(
            fs::read(first.snapshot_path()).unwrap(),
            fs::read(&source).unwrap()
        );
    }

    #[test]
    fn changed_content_gets_new_snapshot_listed_first() {
        let (_dir, store, source) = setup();
        let first = store.backup(&source).unwrap();
        fs::write(&source, "[general]\nenabled = no\n").unwrap();
        let second = store.backup(&source).unwrap();

        assert_ne!(first.checksum(), second.checksum());
        let listed = store.list(&source).unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[test]
    fn reverted_content_reuses_earlier_snapshot() {
        let (_dir, store, source) = setup();
        let original = store.backup(&source).unwrap();
        fs::write(&source, "changed\n").unwrap();
        store.backup(&source).unwrap();
        fs::write(&source, "[general]\nenabled = yes\n").unwrap();

        assert_eq!(store.backup(&source).unwrap(), original);
        assert_eq!(store.list(&source).unwrap().len(), 2);
    }

    #[test]
    fn sources_with_same_file_name_do_not_mix() {
        let (dir, store, source) = setup();
        let other_dir = dir.path().join("other");
        fs::create_dir_all(&other_dir).unwrap();
        let other = other_dir.join("manager.conf");
        fs::write(&other, "[general]\nenabled = yes\n").unwrap();

        store.backup(&source).unwrap();
        store.backup(&other).unwrap();
        assert_eq!(store.list(&source).unwrap().len(), 1);
        assert_eq!(store.list(&other).unwrap().len(), 1);
    }

    #[test]
    fn restore_snapshots_target_first() {
        let (_dir, store, source) = setup();
        let original = store.backup(&source).unwrap();
        fs::write(&source, "broken\n").unwrap();

        let pre = store.restore(&original, &source).unwrap().unwrap();

        assert_eq!(
            fs::read_to_string(&source).unwrap(),
            "[general]\nenabled = yes\n"
        );
        assert_eq!(fs::read_to_string(pre.snapshot_path()).unwrap(), "broken\n");
    }

    #[test]
    fn restore_rejects_tampered_snapshot() {
        let (_dir, store, source) = setup();
        let handle = store.backup(&source).unwrap();
        fs::write(handle.snapshot_path(), "tampered").unwrap();
        let err = store.restore(&handle, &source).unwrap_err();
        assert!(matches!(err, BackupError::ChecksumMismatch(_)));
    }

    #[test]
    fn prune_keeps_most_recent() {
        let (_dir, store, source) = setup();
        for i in 0..4 {
            fs::write(&source, format!("rev {}\n", i)).unwrap();
            store.backup(&source).unwrap();
        }
        assert_eq!(store.prune(&source, 2).unwrap(), 2);
        let left = store.list(&source).unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(fs::read_to_string(left[0].snapshot_path()).unwrap(), "rev 3\n");
    }

    #[test]
    fn retention_applies_on_backup() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::new(dir.path().join("backups"), 2);
        let source = dir.path().join("app.env");
        for i in 0..5 {
            fs::write(&source, format!("K={}\n", i)).unwrap();
            store.backup(&source).unwrap();
        }
        assert_eq!(store.list(&source).unwrap().len(), 2);
    }

    #[test]
    fn handle_covers_only_its_source() {
        let (dir, store, source) = setup();
        let handle = store.backup(&source).unwrap();
        assert!(handle.ensure_covers(&source).is_ok());
        assert!(matches!(
            handle.ensure_covers(&dir.path().join("other.conf")),
            Err(BackupError::Mismatch { .. })
        ));
    }
}
