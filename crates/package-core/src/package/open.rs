use super::{OpenError, Package, PackageInner, Session, VERSION_ENTRY};
use crate::archive::Archive;
use crate::changelog::{parse_changelog, ChangelogEntry, ChangelogType, CHANGELOG_ENTRY};
use crate::content::{ContentHandler, PackageReader};
use crate::events::PackageEvent;
use crate::lock::{LockError, PackageLock};
use crate::upgrade::StepKey;
use crate::version::Version;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

type Result<T> = std::result::Result<T, OpenError>;

impl<H: ContentHandler> Package<H> {
    /// Open the package at `path` and hand its content to the reader.
    ///
    /// Editable opens (`read_only == false`) take the `.lock` sidecar when
    /// locking is enabled and keep a handle on the file. Pending upgrades run
    /// against the in-memory copy only; the file on disk is never modified.
    /// On failure nothing is retained and no `Closed` event is emitted.
    ///
    /// # Panics
    /// If a document is already open on this package.
    pub async fn open(
        &self,
        path: impl AsRef<Path>,
        read_only: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let inner = Arc::clone(&self.inner);
        let span = inner.span.clone();
        async move {
            let result = inner.open(path.clone(), read_only, cancel).await;
            if let Err(e) = &result {
                info!(path = %path.display(), outcome = ?e.outcome(), error = %e, "Open failed");
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Versions read from a raw archive.
struct Versions {
    package: Version,
    application: Version,
}

impl<H: ContentHandler> PackageInner<H> {
    async fn open(&self, path: PathBuf, read_only: bool, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.permit.lock().await;
        assert!(
            !self.session().open,
            "Package::open called while a document is already open; close it first"
        );

        let editable_lock = !read_only && self.options.locking_enabled;
        let mut lock = if editable_lock {
            Some(PackageLock::acquire(&path, &self.options.identity)?)
        } else {
            None
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)
            .await
            .map_err(OpenError::from_io)?;

        let mut bytes = Vec::new();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path = %path.display(), "Open cancelled while reading");
                return Err(OpenError::Cancelled);
            }
            read = file.read_to_end(&mut bytes) => {
                read.map_err(OpenError::from_io)?;
            }
        }
        let handle = if read_only { None } else { Some(file) };

        let mut archive = Archive::from_bytes(&bytes)?;
        let opened = self.check_versions(&archive)?;
        let app = self.options.application_name.as_str();

        let mut changelog = archive
            .get(&format!("{}/{}", app, CHANGELOG_ENTRY))
            .map(|entry| parse_changelog(&entry.data))
            .unwrap_or_default();

        let (current, upgraded) = self.upgrade(&mut archive, &opened, &mut changelog)?;

        if let Some(lock) = lock.as_mut() {
            lock.refresh(&self.options.identity).map_err(|e| match e {
                LockError::Io(io) => OpenError::Locked {
                    descriptor: None,
                    source: Some(io),
                },
                other => other.into(),
            })?;
        }

        {
            let _ignore = self.monitor.ignore();
            let reader = PackageReader::new(&archive, app);
            self.handler
                .read(&reader)
                .await
                .map_err(OpenError::ReadingFailure)?;
        }

        state.archive = Some(archive);
        state.lock = lock;
        state.handle = handle;
        *self.session_mut() = Session {
            path: Some(path.clone()),
            open: true,
            read_only,
            package_version: current.package,
            application_version: current.application,
            changelog,
        };
        self.monitor.reset();
        self.set_content_modified(upgraded);

        info!(
            path = %path.display(),
            read_only,
            package_version = %current.package,
            application_version = %current.application,
            upgraded,
            "Opened package"
        );
        self.events.emit(&PackageEvent::Opened { path, read_only });
        Ok(())
    }

    fn check_versions(&self, archive: &Archive) -> Result<Versions> {
        let package = match archive.read_string(VERSION_ENTRY)? {
            Some(raw) => raw
                .trim()
                .parse::<Version>()
                .map_err(|e| OpenError::corrupted(format!("bad package version: {}", e)))?,
            None => Version::ZERO,
        };
        if package > self.options.package_version {
            return Err(OpenError::IncompatiblePackageVersion {
                found: package,
                supported: self.options.package_version,
            });
        }

        let app = self.options.application_name.as_str();
        let application = match archive.read_string(&format!("{}/{}", app, VERSION_ENTRY))? {
            Some(raw) => raw
                .trim()
                .parse::<Version>()
                .map_err(|e| OpenError::corrupted(format!("bad application version: {}", e)))?,
            None => {
                let own_backup = format!("{}-backup-", app);
                let foreign: Vec<String> = archive
                    .names()
                    .filter_map(|name| name.strip_suffix("/version"))
                    .filter(|folder| !folder.contains('/') && !folder.starts_with(&own_backup))
                    .map(str::to_string)
                    .collect();
                return Err(if foreign.is_empty() {
                    OpenError::corrupted(format!("missing {}/{}", app, VERSION_ENTRY))
                } else {
                    OpenError::IncompatibleApplication { found: foreign }
                });
            }
        };
        if application > self.options.application_version {
            return Err(OpenError::IncompatibleVersion {
                found: application,
                supported: self.options.application_version,
            });
        }

        Ok(Versions {
            package,
            application,
        })
    }

    /// Run pending upgrade steps. Returns the resulting versions and whether anything ran.
    fn upgrade(
        &self,
        archive: &mut Archive,
        opened: &Versions,
        changelog: &mut Vec<ChangelogEntry>,
    ) -> Result<(Versions, bool)> {
        let app = self.options.application_name.as_str();
        let pending = self.upgrades.pending(opened.package, opened.application);
        let mut current = Versions {
            package: opened.package,
            application: opened.application,
        };
        if pending.is_empty() {
            return Ok((current, false));
        }

        if self.options.preserve_upgrade_backup {
            backup_application_entries(archive, app, opened.application);
        }

        for step in &pending {
            self.upgrades.apply(step, archive, app)?;

            let (kind, to) = match step.key {
                StepKey::Package { to } => {
                    current.package = to;
                    (ChangelogType::PackageUpgrade, to)
                }
                StepKey::Application { to, .. } => {
                    current.application = current.application.max(to);
                    (ChangelogType::ApplicationUpgrade, to)
                }
            };
            info!(step = %step.key, from = %step.from, "Applied upgrade step");
            changelog.push(ChangelogEntry::new(
                kind,
                &self.options.identity,
                format!("{} -> {}", step.from, to),
            ));
        }

        Ok((current, true))
    }
}

/// Copy every `{app}/...` entry to `{app}-backup-{version}/...`, timestamps included.
fn backup_application_entries(archive: &mut Archive, app: &str, version: Version) {
    let prefix = format!("{}/", app);
    let entries: Vec<(String, _)> = archive
        .entries_under(&prefix)
        .map(|(name, entry)| (name[prefix.len()..].to_string(), entry.clone()))
        .collect();

    debug!(count = entries.len(), version = %version, "Preserving pre-upgrade entries");
    for (rest, entry) in entries {
        archive.insert_decoded(&format!("{}-backup-{}/{}", app, version, rest), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_copies_app_entries_verbatim() {
        let mut archive = Archive::new();
        archive.insert("app/a.txt", "a").unwrap();
        archive.insert("app/sub/b.txt", "b").unwrap();
        archive.insert("other/c.txt", "c").unwrap();
        let original = archive.get("app/sub/b.txt").unwrap().clone();

        backup_application_entries(&mut archive, "app", Version::new(1, 2, 0));

        assert_eq!(archive.get("app-backup-1.2.0/sub/b.txt"), Some(&original));
        assert!(archive.contains("app-backup-1.2.0/a.txt"));
        assert!(!archive.contains("app-backup-1.2.0/c.txt"));
        assert!(archive.contains("app/a.txt"));
    }
}
