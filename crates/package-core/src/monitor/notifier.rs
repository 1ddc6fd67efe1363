//! Change notification primitives implemented by content types.

use crate::events::{EventBus, Subscription};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// What happened to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum CollectionAction {
    Added { index: usize },
    Removed { index: usize },
    Replaced { index: usize },
    Reset,
}

/// A change reported by one observable object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    PropertyChanged { property: String },
    CollectionChanged { action: CollectionAction },
}

/// Per-object change-notification registration.
#[derive(Default)]
pub struct Notifier {
    bus: Arc<EventBus<ChangeEvent>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        self.bus.subscribe(callback)
    }

    pub fn property_changed(&self, property: &str) {
        self.bus.emit(&ChangeEvent::PropertyChanged {
            property: property.to_string(),
        });
    }

    pub fn collection_changed(&self, action: CollectionAction) {
        self.bus.emit(&ChangeEvent::CollectionChanged { action });
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A node of the content graph the change monitor can attach to.
///
/// Implement it with the [`observable!`](crate::observable) macro rather than by hand.
pub trait Observable: Send + Sync + 'static {
    fn notifier(&self) -> &Notifier;

    /// Observable objects directly owned by this one, in a stable order.
    fn observable_children(&self) -> Vec<ObservableChild> {
        Vec::new()
    }
}

/// One named edge of the content graph.
#[derive(Clone)]
pub struct ObservableChild {
    pub name: String,
    pub node: Arc<dyn Observable>,
}

impl std::fmt::Debug for ObservableChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableChild").field("name", &self.name).finish()
    }
}

/// Field types that can contribute children to an `Observable`.
pub trait ChildSource {
    fn collect_children(&self, name: &str, out: &mut Vec<ObservableChild>);
}

impl<T: Observable> ChildSource for Arc<T> {
    fn collect_children(&self, name: &str, out: &mut Vec<ObservableChild>) {
        out.push(ObservableChild {
            name: name.to_string(),
            node: Arc::clone(self) as Arc<dyn Observable>,
        });
    }
}

impl<S: ChildSource> ChildSource for Option<S> {
    fn collect_children(&self, name: &str, out: &mut Vec<ObservableChild>) {
        if let Some(inner) = self {
            inner.collect_children(name, out);
        }
    }
}

impl<S: ChildSource> ChildSource for RwLock<S> {
    fn collect_children(&self, name: &str, out: &mut Vec<ObservableChild>) {
        self.read()
            .unwrap_or_else(|e| e.into_inner())
            .collect_children(name, out);
    }
}

/// A replaceable child reference.
///
/// Replacing the value does not notify on its own: the owner reports the
/// property change so the monitor re-attaches to the new value.
pub struct Slot<T> {
    value: RwLock<Arc<T>>,
}

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.value.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Store a new value and return the previous one.
    pub fn set(&self, value: Arc<T>) -> Arc<T> {
        std::mem::replace(
            &mut *self.value.write().unwrap_or_else(|e| e.into_inner()),
            value,
        )
    }
}

impl<T: Observable> ChildSource for Slot<T> {
    fn collect_children(&self, name: &str, out: &mut Vec<ObservableChild>) {
        self.get().collect_children(name, out);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slot").field(&self.get()).finish()
    }
}

/// Implement [`Observable`] for a struct from its notifier field and the
/// fields holding child objects (`Arc<T>`, `Slot<T>`, `Option` or `RwLock` of those).
///
/// ```
/// use package_core::monitor::{Notifier, Slot};
/// use package_core::observable;
/// use std::sync::Arc;
///
/// struct Style { notifier: Notifier }
/// observable!(Style { notifier });
///
/// struct Shape { notifier: Notifier, fill: Slot<Style>, stroke: Option<Arc<Style>> }
/// observable!(Shape { notifier; fill, stroke });
/// ```
#[macro_export]
macro_rules! observable {
    ($ty:ty { $notifier:ident $(; $($child:ident),* $(,)?)? }) => {
        impl $crate::monitor::Observable for $ty {
            fn notifier(&self) -> &$crate::monitor::Notifier {
                &self.$notifier
            }

            #[allow(unused_mut)]
            fn observable_children(&self) -> ::std::vec::Vec<$crate::monitor::ObservableChild> {
                let mut children = ::std::vec::Vec::new();
                $($(
                    $crate::monitor::ChildSource::collect_children(
                        &self.$child,
                        stringify!($child),
                        &mut children,
                    );
                )*)?
                children
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Leaf {
        notifier: Notifier,
    }
    crate::observable!(Leaf { notifier });

    struct Branch {
        notifier: Notifier,
        fixed: Arc<Leaf>,
        slot: Slot<Leaf>,
        maybe: Option<Arc<Leaf>>,
    }
    crate::observable!(Branch { notifier; fixed, slot, maybe });

    fn leaf() -> Leaf {
        Leaf {
            notifier: Notifier::new(),
        }
    }

    #[test]
    fn test_macro_lists_children_in_field_order() {
        let branch = Branch {
            notifier: Notifier::new(),
            fixed: Arc::new(leaf()),
            slot: Slot::new(leaf()),
            maybe: None,
        };

        let names: Vec<_> = branch
            .observable_children()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["fixed", "slot"]);
    }

    #[test]
    fn test_slot_set_returns_previous() {
        let first = Arc::new(leaf());
        let slot = Slot::from_arc(Arc::clone(&first));
        let previous = slot.set(Arc::new(leaf()));

        assert!(Arc::ptr_eq(&previous, &first));
        assert!(!Arc::ptr_eq(&slot.get(), &first));
    }

    #[test]
    fn test_notifier_delivers_events() {
        let notifier = Notifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _sub = notifier.subscribe(move |event| {
            if let ChangeEvent::PropertyChanged { property } = event {
                assert_eq!(property, "title");
                seen_clone.fetch_add(1, Ordering::Relaxed);
            }
        });

        notifier.property_changed("title");
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
