use crate::key::Key;
use crate::store::IdentityKeyStore;
use parking_lot::{Mutex, RwLock};
use std::mem;
use std::sync::Arc;

/// Evaluation state of the argument tuple ending at a node
#[derive(Debug, Clone)]
pub(crate) enum NodeState<R> {
    Unevaluated,
    Evaluated(R),
}

/// One point in argument space, reached by a unique key path from its root.
///
/// Children are `Arc`-shared so a caller can keep its terminal node after
/// releasing every lock, which is what lets the wrapped function run unlocked.
pub(crate) struct CacheNode<R> {
    state: RwLock<NodeState<R>>,
    children: Mutex<IdentityKeyStore<Arc<CacheNode<R>>>>,
    sweep_threshold: usize,
}

impl<R> CacheNode<R> {
    pub(crate) fn new(sweep_threshold: usize) -> Self {
        Self {
            state: RwLock::new(NodeState::Unevaluated),
            children: Mutex::new(IdentityKeyStore::with_sweep_threshold(sweep_threshold)),
            sweep_threshold,
        }
    }

    /// Child for `key`, created unevaluated on first traversal.
    pub(crate) fn child(&self, key: &Key) -> Arc<CacheNode<R>> {
        let threshold = self.sweep_threshold;
        self.children
            .lock()
            .get_or_insert_with(key, || Arc::new(CacheNode::new(threshold)))
            .clone()
    }

    /// Walk `keys` in order from this node to the terminal node.
    pub(crate) fn descend(self: &Arc<Self>, keys: &[Key]) -> Arc<CacheNode<R>> {
        keys.iter()
            .fold(Arc::clone(self), |node, key| node.child(key))
    }

    /// Like [`descend`](Self::descend), but never creates nodes.
    pub(crate) fn find(self: &Arc<Self>, keys: &[Key]) -> Option<Arc<CacheNode<R>>> {
        let mut node = Arc::clone(self);
        for key in keys {
            let next = node.children.lock().get(key).cloned()?;
            node = next;
        }
        Some(node)
    }

    pub(crate) fn is_evaluated(&self) -> bool {
        matches!(*self.state.read(), NodeState::Evaluated(_))
    }

    /// Record a successful evaluation. A concurrent evaluation of the same
    /// tuple may already have stored a result; the later write wins.
    pub(crate) fn store(&self, result: R) {
        *self.state.write() = NodeState::Evaluated(result);
    }

    /// Reset the result stored at `keys`, returning whether there was one.
    ///
    /// A terminal node without children is unlinked from its parent as well, so
    /// nothing under `keys` outlives the call.
    pub(crate) fn forget(self: &Arc<Self>, keys: &[Key]) -> bool {
        let Some(node) = self.find(keys) else {
            return false;
        };
        let previous = mem::replace(&mut *node.state.write(), NodeState::Unevaluated);
        let had_result = matches!(previous, NodeState::Evaluated(_));
        drop(previous);

        if let Some((last, prefix)) = keys.split_last() {
            if node.children.lock().is_empty() {
                if let Some(parent) = self.find(prefix) {
                    parent.children.lock().delete(last);
                }
            }
        }
        had_result
    }

    /// Remove stale weak entries in this subtree, returning how many were dropped.
    pub(crate) fn purge(&self) -> usize {
        let (removed, live_children) = {
            let mut children = self.children.lock();
            let removed = children.purge_stale();
            let live: Vec<_> = children.values().cloned().collect();
            (removed, live)
        };
        removed
            + live_children
                .iter()
                .map(|child| child.purge())
                .sum::<usize>()
    }

    #[cfg(test)]
    pub(crate) fn child_count(&self) -> usize {
        self.children.lock().live_len()
    }
}

impl<R: Clone> CacheNode<R> {
    pub(crate) fn cached(&self) -> Option<R> {
        match &*self.state.read() {
            NodeState::Evaluated(result) => Some(result.clone()),
            NodeState::Unevaluated => None,
        }
    }
}
