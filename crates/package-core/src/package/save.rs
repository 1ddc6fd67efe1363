use super::{
    remove_snapshot, with_suffix, Package, PackageInner, PackageState, SaveError, Session,
    VERSION_ENTRY,
};
use crate::archive::Archive;
use crate::changelog::{serialize_changelog, ChangelogEntry, ChangelogType, CHANGELOG_ENTRY};
use crate::content::{ContentHandler, PackageWriter};
use crate::events::PackageEvent;
use crate::lock::{lock_path_for, PackageLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

type Result<T> = std::result::Result<T, SaveError>;

impl<H: ContentHandler> Package<H> {
    /// Save the document to `path`, binding the package to it.
    ///
    /// The content writer builds a fresh archive; entries of the previously
    /// opened archive that the writer neither wrote nor deleted are carried
    /// over unchanged. With backups enabled the previous file becomes
    /// `path.bak`.
    ///
    /// # Panics
    /// If `path` is empty.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        assert!(
            !path.as_os_str().is_empty(),
            "Package::save called with an empty path"
        );
        let path = path.to_path_buf();
        let inner = Arc::clone(&self.inner);
        let span = inner.span.clone();
        async move {
            let result = inner.save_canonical(path.clone()).await;
            if let Err(e) = &result {
                warn!(path = %path.display(), outcome = ?e.outcome(), error = %e, "Save failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Save to the path the package is bound to.
    ///
    /// # Panics
    /// If the package has never been opened or saved.
    pub async fn save_current(&self) -> Result<()> {
        let Some(path) = self.path() else {
            panic!("Package::save_current called on a package that is not bound to a path");
        };
        self.save(path).await
    }
}

impl<H: ContentHandler> PackageInner<H> {
    async fn save_canonical(&self, path: PathBuf) -> Result<()> {
        let mut state = self.permit.lock().await;
        let session = self.session().clone();

        // A lock or handle bound to another path is only let go once this save
        // succeeds; a failed save leaves the previous binding as it was.
        let rebinding = session.path.as_deref() != Some(path.as_path());
        let lock_path = lock_path_for(&path);
        let lock_elsewhere = state
            .lock
            .as_ref()
            .is_some_and(|lock| lock.path() != lock_path.as_path());
        let displaced_lock = if lock_elsewhere { state.lock.take() } else { None };
        let displaced_handle = if rebinding { state.handle.take() } else { None };
        if rebinding {
            debug!(from = ?session.path, to = %path.display(), "Rebinding package path");
        }

        let (archive, changelog, handle, size) =
            match self.write_canonical(&mut state, &path, &session).await {
                Ok(written) => {
                    if let Some(lock) = displaced_lock {
                        lock.release();
                    }
                    drop(displaced_handle);
                    written
                }
                Err(e) => {
                    if rebinding {
                        if let Some(lock) = state.lock.take() {
                            lock.release();
                        }
                        state.lock = displaced_lock;
                        state.handle = displaced_handle;
                    }
                    return Err(e);
                }
            };

        let stale_snapshot = self.auto_save_path();
        state.handle = Some(handle);
        state.archive = Some(archive);
        *self.session_mut() = Session {
            path: Some(path.clone()),
            open: true,
            read_only: false,
            package_version: self.options.package_version,
            application_version: self.options.application_version,
            changelog,
        };
        self.set_content_modified(false);
        self.monitor.reset();

        remove_snapshot(&stale_snapshot).await;
        let snapshot = self.auto_save_path();
        if snapshot != stale_snapshot {
            remove_snapshot(&snapshot).await;
        }

        info!(path = %path.display(), bytes = size, "Saved package");
        self.events.emit(&PackageEvent::Saved { path });
        Ok(())
    }

    /// Lock `path`, build the new archive and put it on disk.
    async fn write_canonical(
        &self,
        state: &mut PackageState,
        path: &Path,
        session: &Session,
    ) -> Result<(Archive, Vec<ChangelogEntry>, File, usize)> {
        if self.options.locking_enabled {
            if state.lock.is_none() {
                state.lock = Some(PackageLock::acquire(path, &self.options.identity)?);
            } else if let Some(lock) = state.lock.as_mut() {
                lock.refresh(&self.options.identity)?;
            }
        }

        let mut changelog = session.changelog.clone();
        changelog.push(ChangelogEntry::new(
            ChangelogType::Save,
            &self.options.identity,
            "",
        ));
        let archive = self.build_archive(state.archive.as_ref(), &changelog).await?;
        let bytes = archive.to_bytes()?;

        // The previous file is about to be renamed or replaced.
        state.handle = None;
        let handle = if self.options.backup_enabled {
            write_with_backup(path, &bytes).await?
        } else {
            atomic_write(path, &bytes).await?;
            File::open(path).await?
        };

        Ok((archive, changelog, handle, bytes.len()))
    }

    /// Write an auto-save snapshot if content changed since the last one.
    ///
    /// `forced` bypasses the enabled flag but not the change check. The
    /// canonical file, the in-memory changelog and the content-modified flag
    /// are never touched. Returns whether a snapshot was written.
    pub(crate) async fn save_snapshot(&self, forced: bool) -> Result<bool> {
        let state = self.permit.lock().await;
        if !(forced || self.auto_save_enabled()) {
            return Ok(false);
        }
        if !self.take_modified_since_auto_save() {
            debug!("Auto-save skipped, nothing changed");
            return Ok(false);
        }

        let target = self.auto_save_path();
        let result = async {
            let mut changelog = self.session().changelog.clone();
            changelog.push(ChangelogEntry::new(
                ChangelogType::AutoSave,
                &self.options.identity,
                "",
            ));
            let archive = self.build_archive(state.archive.as_ref(), &changelog).await?;
            atomic_write(&target, &archive.to_bytes()?).await?;
            Ok::<_, SaveError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(path = %target.display(), forced, "Auto-saved package");
                self.events.emit(&PackageEvent::AutoSaved { path: target });
                Ok(true)
            }
            Err(e) => {
                self.restore_modified_since_auto_save();
                Err(e)
            }
        }
    }

    /// Build a complete archive from the content writer plus carried-forward entries.
    async fn build_archive(
        &self,
        previous: Option<&Archive>,
        changelog: &[ChangelogEntry],
    ) -> Result<Archive> {
        let app = self.options.application_name.as_str();
        let mut archive = Archive::new();
        archive.insert(VERSION_ENTRY, self.options.package_version.to_string())?;

        let deleted = {
            let mut writer = PackageWriter::new(&mut archive, app);
            self.handler
                .write(&mut writer)
                .await
                .map_err(SaveError::Writing)?;
            writer.into_deleted()
        };

        archive.insert(
            &format!("{}/{}", app, VERSION_ENTRY),
            self.options.application_version.to_string(),
        )?;
        archive.insert(
            &format!("{}/{}", app, CHANGELOG_ENTRY),
            serialize_changelog(changelog)?,
        )?;

        if let Some(previous) = previous {
            let mut carried = 0usize;
            for (name, entry) in previous.entries_under("") {
                if archive.contains(name) || deleted.contains(name) {
                    continue;
                }
                archive.insert_decoded(name, entry.clone());
                carried += 1;
            }
            debug!(carried, total = archive.len(), "Carried forward untouched entries");
        }

        Ok(archive)
    }
}

/// Move an existing file to `path.bak`, then write `bytes` to `path` and keep the handle.
async fn write_with_backup(path: &Path, bytes: &[u8]) -> std::io::Result<File> {
    if fs::try_exists(path).await? {
        let backup = with_suffix(path, ".bak");
        fs::rename(path, &backup).await?;
        debug!(backup = %backup.display(), "Kept previous package as backup");
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(file)
}

/// Atomic write using temp file + rename.
///
/// The target is either fully written or not modified at all.
async fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = with_suffix(path, &format!(".{}.tmp", Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&temp_path, bytes).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_replaces_target() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.pkg");
        fs::write(&path, b"old").await.unwrap();

        atomic_write(&path, b"new").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"new");
        let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_with_backup_moves_previous() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.pkg");

        drop(write_with_backup(&path, b"first").await.unwrap());
        assert!(!with_suffix(&path, ".bak").exists());

        drop(write_with_backup(&path, b"second").await.unwrap());
        assert_eq!(fs::read(&path).await.unwrap(), b"second");
        assert_eq!(fs::read(with_suffix(&path, ".bak")).await.unwrap(), b"first");
    }
}
