//! Name-to-index identity registry.
//!
//! Maps stable logical names to the runtime indices the dataplane assigns,
//! with attached metadata. Lookups are O(1) in both directions. Watchers
//! receive every registration and removal through an unbounded queue.

use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// One registered identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxEntry<M> {
    pub name: String,
    pub index: u32,
    pub metadata: M,
    /// Registry version at which this entry was written.
    pub version: u64,
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdxEvent<M> {
    Registered {
        name: String,
        index: u32,
        metadata: M,
    },
    Unregistered {
        name: String,
        index: u32,
        metadata: M,
    },
}

impl<M> IdxEvent<M> {
    pub fn name(&self) -> &str {
        match self {
            IdxEvent::Registered { name, .. } | IdxEvent::Unregistered { name, .. } => name,
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            IdxEvent::Registered { index, .. } | IdxEvent::Unregistered { index, .. } => *index,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, IdxEvent::Unregistered { .. })
    }
}

struct Watcher<M> {
    subscriber: String,
    queue: UnboundedSender<IdxEvent<M>>,
}

struct Inner<M> {
    by_name: HashMap<String, IdxEntry<M>>,
    by_index: HashMap<u32, String>,
    version: u64,
    watchers: Vec<Watcher<M>>,
}

impl<M: Clone> Inner<M> {
    fn publish(&mut self, event: IdxEvent<M>) {
        self.watchers.retain(|w| match w.queue.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!("dropping closed watcher {}", w.subscriber);
                false
            }
        });
    }

    fn remove(&mut self, name: &str) -> Option<IdxEntry<M>> {
        let entry = self.by_name.remove(name)?;
        if self.by_index.get(&entry.index).map(String::as_str) == Some(name) {
            self.by_index.remove(&entry.index);
        }
        self.version += 1;
        self.publish(IdxEvent::Unregistered {
            name: entry.name.clone(),
            index: entry.index,
            metadata: entry.metadata.clone(),
        });
        Some(entry)
    }
}

/// Bidirectional name/index registry.
///
/// Both `name` and `index` are unique. Registering a name that exists
/// overwrites it; registering an index held by another name evicts that
/// name first (the eviction is published as a removal).
pub struct NameToIdx<M> {
    title: String,
    inner: RwLock<Inner<M>>,
}

impl<M> std::fmt::Debug for NameToIdx<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("NameToIdx")
            .field("title", &self.title)
            .field("entries", &inner.by_name.len())
            .field("version", &inner.version)
            .field("watchers", &inner.watchers.len())
            .finish()
    }
}

impl<M: Clone + Send + Sync + 'static> NameToIdx<M> {
    /// Creates an empty registry.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            inner: RwLock::new(Inner {
                by_name: HashMap::new(),
                by_index: HashMap::new(),
                version: 0,
                watchers: Vec::new(),
            }),
        }
    }

    /// Returns the registry title (also used as its persisted file stem).
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Inserts or overwrites the entry for `name`.
    pub fn register_name(&self, name: impl Into<String>, index: u32, metadata: M) {
        let name = name.into();
        let mut inner = self.inner.write();

        if let Some(holder) = inner.by_index.get(&index).cloned() {
            if holder != name {
                debug!("{}: index {} moves from {} to {}", self.title, index, holder, name);
                inner.remove(&holder);
            }
        }
        if let Some(previous) = inner.by_name.get(&name) {
            if previous.index != index {
                let old = previous.index;
                inner.by_index.remove(&old);
            }
        }

        inner.version += 1;
        let version = inner.version;
        inner.by_index.insert(index, name.clone());
        inner.by_name.insert(
            name.clone(),
            IdxEntry {
                name: name.clone(),
                index,
                metadata: metadata.clone(),
                version,
            },
        );
        trace!("{}: registered {} -> {}", self.title, name, index);
        inner.publish(IdxEvent::Registered {
            name,
            index,
            metadata,
        });
    }

    /// Removes the entry for `name`, returning its index and metadata.
    ///
    /// `None` only means there was nothing to remove.
    pub fn unregister_name(&self, name: &str) -> Option<(u32, M)> {
        let entry = self.inner.write().remove(name)?;
        trace!("{}: unregistered {}", self.title, name);
        Some((entry.index, entry.metadata))
    }

    /// Looks up the index and metadata registered for `name`.
    pub fn lookup_idx(&self, name: &str) -> Option<(u32, M)> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|e| (e.index, e.metadata.clone()))
    }

    /// Looks up only the index registered for `name`.
    pub fn lookup_index(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).map(|e| e.index)
    }

    /// Looks up the name and metadata registered under `index`.
    pub fn lookup_name(&self, index: u32) -> Option<(String, M)> {
        let inner = self.inner.read();
        let name = inner.by_index.get(&index)?;
        inner
            .by_name
            .get(name)
            .map(|e| (e.name.clone(), e.metadata.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_name.is_empty()
    }

    /// Returns the current registry version. Every mutation bumps it.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Returns all registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Copies every entry under the lock, sorted by name.
    pub fn snapshot(&self) -> Vec<IdxEntry<M>> {
        let mut entries: Vec<IdxEntry<M>> = self.inner.read().by_name.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Copies `(name, index)` pairs, sorted by name.
    pub fn mapping(&self) -> Vec<(String, u32)> {
        self.snapshot()
            .into_iter()
            .map(|e| (e.name, e.index))
            .collect()
    }

    /// Removes every entry, publishing a removal for each.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let names: Vec<String> = inner.by_name.keys().cloned().collect();
        for name in names {
            inner.remove(&name);
        }
    }

    /// Subscribes a queue to every subsequent change.
    pub fn watch(&self, subscriber: impl Into<String>, queue: UnboundedSender<IdxEvent<M>>) {
        let subscriber = subscriber.into();
        debug!("{}: watcher {} subscribed", self.title, subscriber);
        self.inner.write().watchers.push(Watcher { subscriber, queue });
    }

    /// Removes every subscription made under `subscriber`.
    pub fn unwatch(&self, subscriber: &str) {
        self.inner
            .write()
            .watchers
            .retain(|w| w.subscriber != subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[test]
    fn test_register_and_lookup() {
        let idx: NameToIdx<&'static str> = NameToIdx::new("test");
        idx.register_name("loop1", 3, "meta");

        assert_eq!(idx.lookup_idx("loop1"), Some((3, "meta")));
        assert_eq!(idx.lookup_name(3), Some(("loop1".to_string(), "meta")));
        assert_eq!(idx.lookup_idx("missing"), None);
        assert_eq!(idx.lookup_name(9), None);
    }

    #[test]
    fn test_overwrite_moves_index() {
        let idx: NameToIdx<()> = NameToIdx::new("test");
        idx.register_name("loop1", 3, ());
        idx.register_name("loop1", 5, ());

        assert_eq!(idx.lookup_index("loop1"), Some(5));
        assert_eq!(idx.lookup_name(3), None);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_index_reuse_evicts_previous_holder() {
        let idx: NameToIdx<()> = NameToIdx::new("test");
        idx.register_name("old", 7, ());
        idx.register_name("new", 7, ());

        assert!(!idx.contains("old"));
        assert_eq!(idx.lookup_name(7).map(|(n, _)| n), Some("new".to_string()));
    }

    #[test]
    fn test_unregister() {
        let idx: NameToIdx<u8> = NameToIdx::new("test");
        idx.register_name("a", 1, 10);
        assert_eq!(idx.unregister_name("a"), Some((1, 10)));
        assert_eq!(idx.unregister_name("a"), None);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_versions_increase() {
        let idx: NameToIdx<()> = NameToIdx::new("test");
        let v0 = idx.version();
        idx.register_name("a", 1, ());
        idx.register_name("b", 2, ());
        let snapshot = idx.snapshot();
        assert!(snapshot[0].version < snapshot[1].version);
        assert!(idx.version() > v0);
    }

    #[test]
    fn test_watchers_receive_events_in_order() {
        let idx: NameToIdx<()> = NameToIdx::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        idx.watch("state-reporter", tx);

        idx.register_name("a", 1, ());
        idx.register_name("b", 1, ());
        idx.unregister_name("b");

        let events: Vec<IdxEvent<()>> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let summary: Vec<(bool, String)> = events
            .iter()
            .map(|e| (e.is_delete(), e.name().to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (false, "a".to_string()),
                (true, "a".to_string()),
                (false, "b".to_string()),
                (true, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_closed_watcher_is_dropped() {
        let idx: NameToIdx<()> = NameToIdx::new("test");
        let (tx, rx) = mpsc::unbounded_channel();
        idx.watch("gone", tx);
        drop(rx);
        idx.register_name("a", 1, ());
        assert!(format!("{:?}", idx).contains("watchers: 0"));
    }
}
