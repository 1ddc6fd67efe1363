//! Deep change tracking over the host's content graph.
//!
//! Content types expose change notification and their observable children
//! through [`Observable`] (usually via [`observable!`](crate::observable)).
//! A [`ChangeMonitor`] attaches a listener tree to every registered root and
//! folds every change anywhere below it into one `modified` flag, keeping the
//! path of the most recent change for diagnostics.
//!
//! The monitor does not keep content alive; dropping a root object silently
//! ends its tracking.

mod collections;
mod listener;
mod notifier;

pub use collections::{ObservableList, ObservableVec};
pub use notifier::{ChangeEvent, ChildSource, CollectionAction, Notifier, Observable, ObservableChild, Slot};

use crate::events::{EventBus, Subscription};
use chrono::{DateTime, Utc};
use listener::ListenerNode;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Provenance of one observed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    /// Dotted path from the registered root, e.g. `drawing.layers[2].style`.
    pub path: String,
    pub event: ChangeEvent,
    pub time: DateTime<Utc>,
}

pub(crate) struct MonitorState {
    modified: AtomicBool,
    ignore_depth: AtomicUsize,
    last_change: Mutex<Option<ChangeRecord>>,
    events: Arc<EventBus<ChangeRecord>>,
}

impl MonitorState {
    fn record(&self, path: &str, event: &ChangeEvent) {
        if self.ignore_depth.load(Ordering::SeqCst) > 0 {
            return;
        }

        let record = ChangeRecord {
            path: path.to_string(),
            event: event.clone(),
            time: Utc::now(),
        };
        tracing::trace!(path = %record.path, event = ?record.event, "Content changed");

        *self.last_change.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        self.modified.store(true, Ordering::SeqCst);
        self.events.emit(&record);
    }
}

struct Root {
    node: ListenerNode,
}

/// Folds changes of registered content graphs into one dirty flag.
pub struct ChangeMonitor {
    state: Arc<MonitorState>,
    roots: Mutex<Vec<Root>>,
}

impl Default for ChangeMonitor {
    fn default() -> Self {
        Self {
            state: Arc::new(MonitorState {
                modified: AtomicBool::new(false),
                ignore_depth: AtomicUsize::new(0),
                last_change: Mutex::new(None),
                events: Arc::new(EventBus::new()),
            }),
            roots: Mutex::new(Vec::new()),
        }
    }
}

impl ChangeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `root` and everything reachable from it.
    ///
    /// Returns false if this exact object is already registered.
    pub fn register(&self, name: &str, root: Arc<dyn Observable>) -> bool {
        let address = listener::address_of(&root);
        let mut roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        if roots.iter().any(|r| r.node.address() == address) {
            return false;
        }

        match ListenerNode::attach(name, name.to_string(), &root, &[], &self.state) {
            Some(node) => {
                tracing::debug!(root = name, listeners = node.count(), "Registered content root");
                roots.push(Root { node });
                true
            }
            None => false,
        }
    }

    /// Stop tracking `root`. Returns false if it was not registered.
    pub fn unregister<T: Observable + ?Sized>(&self, root: &Arc<T>) -> bool {
        let address = Arc::as_ptr(root) as *const () as usize;
        let mut roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        let before = roots.len();
        roots.retain(|r| r.node.address() != address);
        roots.len() != before
    }

    /// Detach from every registered root.
    pub fn clear(&self) {
        self.roots.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Suspend change recording until the guard is dropped. Guards nest.
    pub fn ignore(&self) -> IgnoreGuard {
        self.state.ignore_depth.fetch_add(1, Ordering::SeqCst);
        IgnoreGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_ignoring(&self) -> bool {
        self.state.ignore_depth.load(Ordering::SeqCst) > 0
    }

    pub fn is_modified(&self) -> bool {
        self.state.modified.load(Ordering::SeqCst)
    }

    /// Clear the modified flag. The last change record is kept.
    pub fn reset(&self) {
        self.state.modified.store(false, Ordering::SeqCst);
    }

    pub fn last_change(&self) -> Option<ChangeRecord> {
        self.state
            .last_change
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Called for every recorded (not ignored) change.
    pub fn subscribe(&self, callback: impl Fn(&ChangeRecord) + Send + Sync + 'static) -> Subscription {
        self.state.events.subscribe(callback)
    }

    /// Number of live listener nodes across all roots.
    pub fn listener_count(&self) -> usize {
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.node.count())
            .sum()
    }
}

impl std::fmt::Debug for ChangeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeMonitor")
            .field("modified", &self.is_modified())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Scope during which changes are not recorded.
#[must_use = "changes are only ignored while the guard is alive"]
pub struct IgnoreGuard {
    state: Arc<MonitorState>,
}

impl Drop for IgnoreGuard {
    fn drop(&mut self) {
        self.state.ignore_depth.fetch_sub(1, Ordering::SeqCst);
    }
}
