//! Advisory `.lock` sidecar for editable sessions.
//!
//! ## Protocol
//! - Acquire: create `<path>.lock` exclusively and write a `LockDescriptor`.
//! - If the sidecar already exists, decide whether its holder is alive. The
//!   holder keeps the sidecar open with an exclusive `fs2` lock; on platforms
//!   where an open file cannot be deleted, the delete attempt itself also fails.
//!   A sidecar we can lock and delete is orphaned and gets recreated.
//! - Release: unlock, close and delete. A failed delete is logged only.
//!
//! This is best-effort coordination between cooperating processes, not a
//! distributed lock: behaviour depends on the filesystem's lock and delete semantics.

use crate::options::UserIdentity;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Contents of the sidecar file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDescriptor {
    #[serde(default)]
    pub username: String,
    #[serde(default = "unknown_date")]
    pub date_opened: DateTime<Utc>,
}

fn unknown_date() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl LockDescriptor {
    pub fn new(identity: &UserIdentity) -> Self {
        Self {
            username: identity.username.clone(),
            date_opened: Utc::now(),
        }
    }
}

impl std::fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} since {}",
            if self.username.is_empty() { "unknown user" } else { self.username.as_str() },
            self.date_opened.to_rfc3339()
        )
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Package is locked{}", .0.as_ref().map(|d| format!(" by {}", d)).unwrap_or_default())]
    AlreadyLocked(Option<LockDescriptor>),

    #[error("Lock IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// A held sidecar lock. Released on drop.
#[derive(Debug)]
pub struct PackageLock {
    file: Option<File>,
    path: PathBuf,
    descriptor: LockDescriptor,
}

impl PackageLock {
    /// Acquire the sidecar lock for the package at `package_path`.
    pub fn acquire(package_path: &Path, identity: &UserIdentity) -> Result<Self> {
        let lock_path = lock_path_for(package_path);

        match Self::create(&lock_path, identity) {
            Ok(lock) => return Ok(lock),
            Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        if !try_remove_stale(&lock_path) {
            let descriptor = read_descriptor(&lock_path).ok();
            debug!(path = %lock_path.display(), holder = ?descriptor, "Package lock held by a live session");
            return Err(LockError::AlreadyLocked(descriptor));
        }

        warn!(path = %lock_path.display(), "Replacing orphaned package lock");
        match Self::create(&lock_path, identity) {
            Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Another session won the race for the orphaned lock.
                Err(LockError::AlreadyLocked(read_descriptor(&lock_path).ok()))
            }
            other => other,
        }
    }

    fn create(lock_path: &Path, identity: &UserIdentity) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(lock_path)?;

        if let Err(e) = file.try_lock_exclusive() {
            let _ = std::fs::remove_file(lock_path);
            return Err(LockError::Io(e));
        }

        let descriptor = LockDescriptor::new(identity);
        write_descriptor(&mut file, &descriptor)?;
        debug!(path = %lock_path.display(), "Acquired package lock");

        Ok(Self {
            file: Some(file),
            path: lock_path.to_path_buf(),
            descriptor,
        })
    }

    /// Rewrite the descriptor with a fresh `dateOpened`.
    pub fn refresh(&mut self, identity: &UserIdentity) -> Result<()> {
        let descriptor = LockDescriptor::new(identity);
        if let Some(file) = self.file.as_mut() {
            write_descriptor(file, &descriptor)?;
        }
        self.descriptor = descriptor;
        Ok(())
    }

    pub fn descriptor(&self) -> &LockDescriptor {
        &self.descriptor
    }

    /// Path of the sidecar file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock, close and delete the sidecar.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        let _ = FileExt::unlock(&file);
        drop(file);

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released package lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to delete package lock"),
        }
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn write_descriptor(file: &mut File, descriptor: &LockDescriptor) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(descriptor).map_err(std::io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.sync_all()
}

/// Returns true when the existing sidecar had no live holder and is now gone.
fn try_remove_stale(lock_path: &Path) -> bool {
    let probe = match OpenOptions::new().read(true).write(true).open(lock_path) {
        Ok(file) => file,
        // Vanished between our create attempt and now: nothing to remove.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(_) => return false,
    };

    if probe.try_lock_exclusive().is_err() {
        return false;
    }

    let removed = match std::fs::remove_file(lock_path) {
        Ok(()) => true,
        Err(e) => e.kind() == std::io::ErrorKind::NotFound,
    };
    let _ = FileExt::unlock(&probe);
    removed
}

/// Sidecar path for a package: `<path>.lock`.
pub fn lock_path_for(package_path: &Path) -> PathBuf {
    let mut lock_path = package_path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

/// Read a descriptor, tolerating missing fields.
pub fn read_descriptor(lock_path: &Path) -> std::io::Result<LockDescriptor> {
    let mut file = File::open(lock_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Descriptor of the current holder, if the package appears locked.
pub fn is_locked(package_path: &Path) -> Option<LockDescriptor> {
    let lock_path = lock_path_for(package_path);
    if lock_path.exists() {
        read_descriptor(&lock_path).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(name: &str) -> UserIdentity {
        UserIdentity {
            username: name.to_string(),
            computer_name: "test-host".to_string(),
        }
    }

    #[test]
    fn test_lock_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let package_path = temp_dir.path().join("doc.pkg");

        let lock = PackageLock::acquire(&package_path, &identity("ada")).unwrap();
        let lock_path = lock_path_for(&package_path);
        assert!(lock_path.exists());
        assert_eq!(read_descriptor(&lock_path).unwrap().username, "ada");

        lock.release();
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_conflict_reports_holder() {
        let temp_dir = TempDir::new().unwrap();
        let package_path = temp_dir.path().join("doc.pkg");

        let _held = PackageLock::acquire(&package_path, &identity("ada")).unwrap();
        match PackageLock::acquire(&package_path, &identity("bob")) {
            Err(LockError::AlreadyLocked(Some(holder))) => assert_eq!(holder.username, "ada"),
            other => panic!("Expected AlreadyLocked, got {:?}", other),
        }
    }

    #[test]
    fn test_orphaned_lock_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let package_path = temp_dir.path().join("doc.pkg");
        let lock_path = lock_path_for(&package_path);

        // Left behind by a crashed session: nobody holds it open.
        std::fs::write(&lock_path, br#"{"username":"ghost","dateOpened":"2020-01-01T00:00:00Z"}"#)
            .unwrap();

        let lock = PackageLock::acquire(&package_path, &identity("ada")).unwrap();
        assert_eq!(lock.descriptor().username, "ada");
        assert_eq!(read_descriptor(&lock_path).unwrap().username, "ada");
    }

    #[test]
    fn test_partial_descriptor_is_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("doc.pkg.lock");
        std::fs::write(&lock_path, br#"{"username":"ada"}"#).unwrap();

        let descriptor = read_descriptor(&lock_path).unwrap();
        assert_eq!(descriptor.username, "ada");
        assert_eq!(descriptor.date_opened, DateTime::<Utc>::default());
    }

    #[test]
    fn test_refresh_rewrites_descriptor() {
        let temp_dir = TempDir::new().unwrap();
        let package_path = temp_dir.path().join("doc.pkg");

        let mut lock = PackageLock::acquire(&package_path, &identity("ada")).unwrap();
        lock.refresh(&identity("ada-renamed")).unwrap();

        let on_disk = read_descriptor(&lock_path_for(&package_path)).unwrap();
        assert_eq!(on_disk.username, "ada-renamed");
        assert_eq!(&on_disk, lock.descriptor());
    }

    #[test]
    fn test_is_locked() {
        let temp_dir = TempDir::new().unwrap();
        let package_path = temp_dir.path().join("doc.pkg");

        assert!(is_locked(&package_path).is_none());
        let lock = PackageLock::acquire(&package_path, &identity("ada")).unwrap();
        assert!(is_locked(&package_path).is_some());
        drop(lock);
        assert!(is_locked(&package_path).is_none());
    }
}
