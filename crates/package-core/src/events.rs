//! Event infrastructure shared by the package engine and the change monitor.
//!
//! `EventBus<E>` fans events out to subscribers. The package publishes
//! `PackageEvent`s on one, and every observable content object owns one
//! (through its `Notifier`) for `ChangeEvent`s.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Lifecycle events emitted by a `Package`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PackageEvent {
    /// A package file was opened and its content handed to the reader.
    Opened {
        path: PathBuf,
        #[serde(rename = "readOnly")]
        read_only: bool,
    },
    /// A canonical save completed.
    Saved { path: PathBuf },
    /// An auto-save snapshot was written.
    AutoSaved { path: PathBuf },
    /// A previously opened package was closed.
    Closed { path: PathBuf },
    /// The content-modified flag changed value.
    ModifiedChanged { modified: bool },
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Event bus for publishing events to subscribers.
///
/// Thread-safe; wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let bus: Arc<dyn Unsubscribe> = Arc::clone(self) as Arc<dyn Unsubscribe>;
        Subscription {
            bus: Arc::downgrade(&bus),
            id,
        }
    }

    /// Emit an event to all subscribers.
    ///
    /// The callback list is snapshotted so a callback may subscribe or
    /// unsubscribe. A subscription dropped while the emit is in flight is not
    /// called afterwards.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in callbacks {
            if self.is_subscribed(id) {
                callback(event);
            }
        }
    }

    fn is_subscribed(&self, id: usize) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(i, _)| *i == id)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<E: 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // No lock is held while callbacks run, so this cannot deadlock.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event: &PackageEvent| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(&PackageEvent::ModifiedChanged { modified: true });

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event: &PackageEvent| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(&PackageEvent::ModifiedChanged { modified: true });
            assert_eq!(bus.subscriber_count(), 1);
        }

        bus.emit(&PackageEvent::ModifiedChanged { modified: false });

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_other() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let slot: Arc<std::sync::Mutex<Option<Subscription>>> = Arc::default();
        let slot_clone = Arc::clone(&slot);

        let _dropper = bus.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(bus.subscribe(|_| {}));
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(&1);

        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_subscription_dropped_mid_emit_is_not_called() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let slot: Arc<std::sync::Mutex<Option<Subscription>>> = Arc::default();
        let slot_clone = Arc::clone(&slot);
        let late_calls = Arc::new(AtomicUsize::new(0));
        let late_clone = Arc::clone(&late_calls);

        let _dropper = bus.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(bus.subscribe(move |_| {
            late_clone.fetch_add(1, Ordering::Relaxed);
        }));

        bus.emit(&1);
        bus.emit(&2);

        assert_eq!(late_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_unsubscribe_from_another_thread_while_emitting() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let subscriptions: Vec<_> = (0..64).map(|_| bus.subscribe(|_| {})).collect();

        let emitter = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                for n in 0..1_000 {
                    bus.emit(&n);
                }
            })
        };
        drop(subscriptions);
        emitter.join().unwrap();

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_package_event_serialization() {
        let event = PackageEvent::Opened {
            path: PathBuf::from("doc.pkg"),
            read_only: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"opened\""));
        assert!(json.contains("\"readOnly\":true"));
    }
}
