//! Collections that report their own mutations.
//!
//! Locks are released before notifying, so subscribers may read the collection.

use super::notifier::{CollectionAction, Notifier, Observable, ObservableChild};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A list of observable objects. Each element is a child named `[index]`.
pub struct ObservableList<T> {
    items: RwLock<Vec<Arc<T>>>,
    notifier: Notifier,
}

impl<T> Default for ObservableList<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            notifier: Notifier::new(),
        }
    }
}

impl<T> ObservableList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<T>>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<T>>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, item: Arc<T>) {
        let index = {
            let mut items = self.write();
            items.push(item);
            items.len() - 1
        };
        self.notifier.collection_changed(CollectionAction::Added { index });
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, item: Arc<T>) {
        let index = {
            let mut items = self.write();
            let index = index.min(items.len());
            items.insert(index, item);
            index
        };
        self.notifier.collection_changed(CollectionAction::Added { index });
    }

    pub fn remove(&self, index: usize) -> Option<Arc<T>> {
        let removed = {
            let mut items = self.write();
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.notifier.collection_changed(CollectionAction::Removed { index });
        }
        removed
    }

    /// Replace the element at `index`, returning the old one.
    pub fn set(&self, index: usize, item: Arc<T>) -> Option<Arc<T>> {
        let previous = {
            let mut items = self.write();
            items
                .get_mut(index)
                .map(|slot| std::mem::replace(slot, item))
        };
        if previous.is_some() {
            self.notifier.collection_changed(CollectionAction::Replaced { index });
        }
        previous
    }

    pub fn clear(&self) {
        self.write().clear();
        self.notifier.collection_changed(CollectionAction::Reset);
    }

    pub fn get(&self, index: usize) -> Option<Arc<T>> {
        self.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.read().clone()
    }
}

impl<T: Observable> Observable for ObservableList<T> {
    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn observable_children(&self) -> Vec<ObservableChild> {
        self.read()
            .iter()
            .enumerate()
            .map(|(i, item)| ObservableChild {
                name: format!("[{}]", i),
                node: Arc::clone(item) as Arc<dyn Observable>,
            })
            .collect()
    }
}

impl<T> FromIterator<Arc<T>> for ObservableList<T> {
    fn from_iter<I: IntoIterator<Item = Arc<T>>>(iter: I) -> Self {
        Self {
            items: RwLock::new(iter.into_iter().collect()),
            notifier: Notifier::new(),
        }
    }
}

/// A list of plain values. Mutations are reported, but elements have no children.
pub struct ObservableVec<T> {
    items: RwLock<Vec<T>>,
    notifier: Notifier,
}

impl<T> Default for ObservableVec<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            notifier: Notifier::new(),
        }
    }
}

impl<T: Clone> ObservableVec<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: T) {
        let index = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            items.push(value);
            items.len() - 1
        };
        self.notifier.collection_changed(CollectionAction::Added { index });
    }

    pub fn remove(&self, index: usize) -> Option<T> {
        let removed = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.notifier.collection_changed(CollectionAction::Removed { index });
        }
        removed
    }

    pub fn set(&self, index: usize, value: T) -> Option<T> {
        let previous = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            items
                .get_mut(index)
                .map(|slot| std::mem::replace(slot, value))
        };
        if previous.is_some() {
            self.notifier.collection_changed(CollectionAction::Replaced { index });
        }
        previous
    }

    pub fn clear(&self) {
        self.items.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.notifier.collection_changed(CollectionAction::Reset);
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<T: Send + Sync + 'static> Observable for ObservableVec<T> {
    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::notifier::ChangeEvent;
    use std::sync::Mutex;

    struct Item {
        notifier: Notifier,
    }
    crate::observable!(Item { notifier });

    fn item() -> Arc<Item> {
        Arc::new(Item {
            notifier: Notifier::new(),
        })
    }

    fn record(notifier: &Notifier) -> (Arc<Mutex<Vec<ChangeEvent>>>, crate::events::Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = notifier.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (events, sub)
    }

    #[test]
    fn test_list_mutations_emit_actions() {
        let list = ObservableList::new();
        let (events, _sub) = record(list.notifier());

        list.push(item());
        list.insert(99, item());
        list.set(0, item());
        list.remove(1);
        assert!(list.remove(5).is_none());
        list.clear();

        let actions: Vec<_> = events
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                ChangeEvent::CollectionChanged { action } => *action,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            actions,
            vec![
                CollectionAction::Added { index: 0 },
                CollectionAction::Added { index: 1 },
                CollectionAction::Replaced { index: 0 },
                CollectionAction::Removed { index: 1 },
                CollectionAction::Reset,
            ]
        );
    }

    #[test]
    fn test_list_children_are_indexed() {
        let list: ObservableList<Item> = [item(), item()].into_iter().collect();
        let names: Vec<_> = list
            .observable_children()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["[0]", "[1]"]);
    }

    #[test]
    fn test_vec_of_values() {
        let values = ObservableVec::new();
        let (events, _sub) = record(values.notifier());

        values.push("a".to_string());
        values.push("b".to_string());
        assert_eq!(values.set(1, "c".to_string()).as_deref(), Some("b"));
        assert_eq!(values.to_vec(), vec!["a", "c"]);
        assert!(values.observable_children().is_empty());
        assert_eq!(events.lock().unwrap().len(), 3);
    }
}
