//! Listener tree mirroring the observed content graph.
//!
//! Every node subscribes to one object's notifier and owns the nodes of that
//! object's children. When an object reports a change its direct children are
//! re-enumerated: edges whose (name, object) pair is unchanged keep their
//! subtree, replaced or new edges get fresh listeners, and listeners of removed
//! children are dropped, which unsubscribes their whole subtree.

use super::notifier::{ChangeEvent, Observable};
use super::MonitorState;
use crate::events::Subscription;
use std::sync::{Arc, Mutex, Weak};

pub(super) fn address_of(node: &Arc<dyn Observable>) -> usize {
    Arc::as_ptr(node) as *const () as usize
}

fn child_path(parent: &str, name: &str) -> String {
    if name.starts_with('[') {
        format!("{}{}", parent, name)
    } else {
        format!("{}.{}", parent, name)
    }
}

pub(super) struct ListenerNode {
    name: String,
    address: usize,
    children: Arc<Mutex<Vec<ListenerNode>>>,
    _subscription: Subscription,
}

impl ListenerNode {
    /// Attach to `node` and, recursively, to its children.
    ///
    /// `ancestors` holds the addresses from the root down to the parent; a node
    /// already on that chain closes a cycle and is not attached again.
    pub(super) fn attach(
        name: &str,
        path: String,
        node: &Arc<dyn Observable>,
        ancestors: &[usize],
        state: &Arc<MonitorState>,
    ) -> Option<Self> {
        let address = address_of(node);
        if ancestors.contains(&address) {
            tracing::trace!(path = %path, "Cycle in content graph, not descending");
            return None;
        }

        let mut chain = ancestors.to_vec();
        chain.push(address);

        let children = Arc::new(Mutex::new(Vec::new()));
        reconcile(node, &path, &chain, &mut children.lock().unwrap_or_else(|e| e.into_inner()), state);

        let subscription = node.notifier().subscribe({
            let target: Weak<dyn Observable> = Arc::downgrade(node);
            let state = Arc::downgrade(state);
            let children = Arc::clone(&children);
            move |event: &ChangeEvent| {
                let (Some(target), Some(state)) = (target.upgrade(), state.upgrade()) else {
                    return;
                };
                state.record(&path, event);
                let mut children = children.lock().unwrap_or_else(|e| e.into_inner());
                reconcile(&target, &path, &chain, &mut children, &state);
            }
        });

        Some(Self {
            name: name.to_string(),
            address,
            children,
            _subscription: subscription,
        })
    }

    pub(super) fn address(&self) -> usize {
        self.address
    }

    /// Number of listener nodes in this subtree, this one included.
    pub(super) fn count(&self) -> usize {
        1 + self
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(ListenerNode::count)
            .sum::<usize>()
    }
}

fn reconcile(
    target: &Arc<dyn Observable>,
    path: &str,
    chain: &[usize],
    children: &mut Vec<ListenerNode>,
    state: &Arc<MonitorState>,
) {
    let mut previous = std::mem::take(children);

    for child in target.observable_children() {
        let address = address_of(&child.node);
        let kept = previous
            .iter()
            .position(|n| n.address == address && n.name == child.name);

        match kept {
            Some(index) => children.push(previous.swap_remove(index)),
            None => {
                let path = child_path(path, &child.name);
                if let Some(node) = ListenerNode::attach(&child.name, path, &child.node, chain, state) {
                    children.push(node);
                }
            }
        }
    }

    // Whatever is left in `previous` was detached from the graph.
    drop(previous);
}
