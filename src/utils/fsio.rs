//! Durable file replacement and the advisory run lock
//!
//! Every managed file is rewritten through [`atomic_write`]: the new content
//! lands in a temp file in the same directory, is fsynced, and is renamed
//! over the target. An interrupted run leaves either the old or the new
//! file, never a truncated one.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` atomically
///
/// The target's permission bits are carried over to the replacement so a
/// `0640` manager.conf stays `0640`.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file path for atomic write: {}", path.display()),
        )
    })?;
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let tmp = parent.join(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    let result = write_and_rename(&tmp, path, contents);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp, meta.permissions())?;
    }

    fs::rename(tmp, path)?;

    // Persist the rename itself; not every platform lets us open a directory.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Advisory lock held for the duration of a mutating run
///
/// An exclusive OS lock on `<target>.amidoctor.lock`. The kernel drops it
/// when the owning process exits, so a crashed run never leaves a lock
/// behind. The file itself stays on disk; only the lock matters. The PID
/// written into it is informational.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Lock file path guarding `target`
    pub fn path_for(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "target".to_string());
        target.with_file_name(format!("{}.{}", name, crate::constants::RUN_LOCK_SUFFIX))
    }

    /// Acquire the lock guarding `target` without waiting
    ///
    /// Returns `Err` with `ErrorKind::AlreadyExists` when another run holds it.
    pub fn acquire(target: &Path) -> io::Result<Self> {
        let path = Self::path_for(target);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("run lock held: {}", path.display()),
                ));
            }
            return Err(e);
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manager.conf");
        fs::write(&path, "old").unwrap();

        atomic_write(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("manager.conf");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        atomic_write(&path, b"new").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn second_lock_is_refused_until_release() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("manager.conf");

        let first = RunLock::acquire(&target).unwrap();
        let second = RunLock::acquire(&target);
        assert_eq!(second.unwrap_err().kind(), io::ErrorKind::AlreadyExists);

        drop(first);
        let third = RunLock::acquire(&target).unwrap();
        assert_eq!(
            fs::read_to_string(third.path()).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn held_lock_with_empty_file_is_not_taken_over() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("manager.conf");

        // Owner holds the lock but has not written its PID yet.
        let holder = RunLock::acquire(&target).unwrap();
        fs::write(holder.path(), "").unwrap();

        let err = RunLock::acquire(&target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(holder.path().exists());
    }

    #[test]
    fn leftover_lock_file_without_owner_is_reused() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("manager.conf");
        fs::write(RunLock::path_for(&target), "4294967294\n").unwrap();

        let lock = RunLock::acquire(&target).unwrap();
        let owner = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }
}
