//! The package engine: one document session around a versioned archive file.
//!
//! ## Operations
//! - `open`: load, lock, upgrade and hand the archive to the content reader.
//! - `save`: rebuild the archive through the content writer and write it out.
//! - `close`: release the lock and forget the session.
//! - auto-save: periodic snapshots to a side file (see `autosave`).
//!
//! Open, save and auto-save run one at a time per package behind a single
//! async permit. The handler, options and monitor are shared by every clone.

mod open;
mod outcome;
mod save;

pub use outcome::{classify_open_error, OpenError, OpenOutcome, SaveError, SaveOutcome};

use crate::archive::Archive;
use crate::autosave::AutoSaveState;
use crate::changelog::ChangelogEntry;
use crate::content::ContentHandler;
use crate::events::{EventBus, PackageEvent, Subscription};
use crate::lock::PackageLock;
use crate::monitor::ChangeMonitor;
use crate::options::PackageOptions;
use crate::upgrade::UpgradeChain;
use crate::version::Version;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

/// Root entry holding the package-format version.
pub const VERSION_ENTRY: &str = "version";

/// Resources owned by the open session. Only touched while holding the permit.
#[derive(Default)]
pub(crate) struct PackageState {
    /// The archive as last opened or saved; source of carried-forward entries.
    pub(crate) archive: Option<Archive>,
    pub(crate) lock: Option<PackageLock>,
    /// Handle on the canonical file for editable sessions.
    pub(crate) handle: Option<tokio::fs::File>,
}

/// Session metadata readable without the permit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    pub(crate) path: Option<PathBuf>,
    pub(crate) open: bool,
    pub(crate) read_only: bool,
    pub(crate) package_version: Version,
    pub(crate) application_version: Version,
    pub(crate) changelog: Vec<ChangelogEntry>,
}

pub(crate) struct PackageInner<H: ContentHandler> {
    pub(crate) handler: H,
    pub(crate) options: PackageOptions,
    pub(crate) upgrades: UpgradeChain,
    pub(crate) span: Span,
    pub(crate) session_id: Uuid,
    pub(crate) permit: tokio::sync::Mutex<PackageState>,
    session: RwLock<Session>,
    content_modified: AtomicBool,
    modified_since_auto_save: AtomicBool,
    pub(crate) monitor: ChangeMonitor,
    _monitor_subscription: Subscription,
    pub(crate) events: Arc<EventBus<PackageEvent>>,
    pub(crate) auto_save: Mutex<AutoSaveState>,
}

impl<H: ContentHandler> PackageInner<H> {
    pub(crate) fn session(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn session_mut(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_content_modified(&self) -> bool {
        self.content_modified.load(Ordering::SeqCst)
    }

    pub(crate) fn is_modified_since_auto_save(&self) -> bool {
        self.modified_since_auto_save.load(Ordering::SeqCst)
    }

    /// Set the content-modified flag. Setting it also marks the content as not
    /// yet auto-saved; clearing it clears both.
    pub(crate) fn set_content_modified(&self, modified: bool) {
        self.modified_since_auto_save.store(modified, Ordering::SeqCst);
        let previous = self.content_modified.swap(modified, Ordering::SeqCst);
        if previous != modified {
            self.events.emit(&PackageEvent::ModifiedChanged { modified });
        }
    }

    /// Take the auto-save flag, returning whether it was set.
    pub(crate) fn take_modified_since_auto_save(&self) -> bool {
        self.modified_since_auto_save.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn restore_modified_since_auto_save(&self) {
        self.modified_since_auto_save.store(true, Ordering::SeqCst);
    }
}

impl<H: ContentHandler> Drop for PackageInner<H> {
    fn drop(&mut self) {
        if let Ok(mut auto_save) = self.auto_save.lock() {
            auto_save.disarm();
        }
    }
}

/// A document session bound to one content handler.
///
/// Cloning is cheap and every clone drives the same session. The lock file,
/// if any, is released when the last clone is dropped.
pub struct Package<H: ContentHandler> {
    pub(crate) inner: Arc<PackageInner<H>>,
}

impl<H: ContentHandler> Clone for Package<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ContentHandler> Package<H> {
    pub fn new(handler: H, options: PackageOptions) -> Self {
        Self::with_upgrades(handler, options, UpgradeChain::new())
    }

    pub fn with_upgrades(handler: H, options: PackageOptions, upgrades: UpgradeChain) -> Self {
        let span = options
            .span
            .clone()
            .unwrap_or_else(|| info_span!("package", app = %options.application_name));

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<PackageInner<H>>| {
            let monitor = ChangeMonitor::new();
            let weak = weak.clone();
            let subscription = monitor.subscribe(move |_change| {
                if let Some(inner) = weak.upgrade() {
                    inner.set_content_modified(true);
                }
            });

            PackageInner {
                handler,
                options,
                upgrades,
                span,
                session_id: Uuid::new_v4(),
                permit: tokio::sync::Mutex::new(PackageState::default()),
                session: RwLock::new(Session::default()),
                content_modified: AtomicBool::new(false),
                modified_since_auto_save: AtomicBool::new(false),
                monitor,
                _monitor_subscription: subscription,
                events: Arc::new(EventBus::new()),
                auto_save: Mutex::new(AutoSaveState::default()),
            }
        });

        Self { inner }
    }

    /// Close the current document, if any.
    ///
    /// Releases the lock, drops the retained file handle, deletes a leftover
    /// auto-save snapshot and emits `Closed`. Auto-save configuration is kept.
    pub async fn close(&self) {
        let inner = Arc::clone(&self.inner);
        let span = inner.span.clone();
        async move {
            let mut state = inner.permit.lock().await;
            let session = inner.session().clone();
            if !session.open {
                return;
            }

            if let Some(lock) = state.lock.take() {
                lock.release();
            }
            state.handle = None;
            state.archive = None;

            let snapshot = inner.auto_save_path();
            remove_snapshot(&snapshot).await;

            *inner.session_mut() = Session::default();
            inner.set_content_modified(false);
            inner.monitor.reset();

            let path = session.path.unwrap_or_default();
            tracing::info!(path = %path.display(), "Closed package");
            inner.events.emit(&PackageEvent::Closed { path });
        }
        .instrument(span)
        .await
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    pub fn options(&self) -> &PackageOptions {
        &self.inner.options
    }

    /// Path the document is bound to (opened from or last saved to).
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.session().path.clone()
    }

    pub fn package_version(&self) -> Version {
        self.inner.session().package_version
    }

    pub fn application_version(&self) -> Version {
        self.inner.session().application_version
    }

    pub fn is_open(&self) -> bool {
        self.inner.session().open
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.session().read_only
    }

    pub fn is_content_modified(&self) -> bool {
        self.inner.is_content_modified()
    }

    pub fn is_modified_since_auto_save(&self) -> bool {
        self.inner.is_modified_since_auto_save()
    }

    pub fn set_content_modified(&self, modified: bool) {
        self.inner.set_content_modified(modified);
    }

    pub fn changelog(&self) -> Vec<ChangelogEntry> {
        self.inner.session().changelog.clone()
    }

    pub fn monitor(&self) -> &ChangeMonitor {
        &self.inner.monitor
    }

    pub fn subscribe(&self, callback: impl Fn(&PackageEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }
}

impl<H: ContentHandler> std::fmt::Debug for Package<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session();
        f.debug_struct("Package")
            .field("app", &self.inner.options.application_name)
            .field("path", &session.path)
            .field("open", &session.open)
            .field("read_only", &session.read_only)
            .field("modified", &self.is_content_modified())
            .finish()
    }
}

/// `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) async fn remove_snapshot(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed auto-save snapshot"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove auto-save snapshot"),
    }
}
