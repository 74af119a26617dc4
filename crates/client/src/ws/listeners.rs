//! Ordered listener registry keyed by event kind.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Disposal token returned by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A registered callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callbacks grouped by kind, invoked in registration order.
pub(crate) struct ListenerRegistry<K, T> {
    next_id: u64,
    by_kind: HashMap<K, Vec<(ListenerId, Callback<T>)>>,
}

impl<K, T> Default for ListenerRegistry<K, T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            by_kind: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T> ListenerRegistry<K, T> {
    pub(crate) fn add(&mut self, kind: K, callback: Callback<T>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_kind.entry(kind).or_default().push((id, callback));
        id
    }

    /// Returns whether a registration was removed.
    pub(crate) fn remove(&mut self, kind: &K, id: ListenerId) -> bool {
        let Some(entries) = self.by_kind.get_mut(kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_kind.remove(kind);
        }
        removed
    }

    /// Callbacks for `kind`, cloned so they can run without the registry borrowed.
    pub(crate) fn snapshot(&self, kind: &K) -> Vec<Callback<T>> {
        self.by_kind
            .get(kind)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self, kind: &K) -> usize {
        self.by_kind.get(kind).map_or(0, Vec::len)
    }
}
