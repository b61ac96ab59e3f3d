//! Deferred-resource index.
//!
//! Tracks desired resources whose realization is blocked on a prerequisite
//! (an interface, a host interface, a policy). Entries are keyed by their
//! own name; a reverse index maps each prerequisite name to the keys waiting
//! on it, in the order they were deferred.

use std::collections::HashMap;
use std::fmt;

/// Why a resource is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockingReason {
    /// The named prerequisite does not exist yet.
    MissingPrerequisite,
    /// Realization was attempted and failed.
    ApplyError(String),
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingReason::MissingPrerequisite => write!(f, "missing prerequisite"),
            BlockingReason::ApplyError(e) => write!(f, "apply error: {}", e),
        }
    }
}

/// A resource waiting for its prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry<C> {
    pub key: String,
    pub prerequisite: String,
    pub config: C,
    pub reason: BlockingReason,
}

/// Pending configs indexed by key and by prerequisite.
#[derive(Debug, Clone)]
pub struct DeferredIndex<C> {
    entries: HashMap<String, PendingEntry<C>>,
    /// Reverse index: prerequisite -> keys waiting on it
    waiters: HashMap<String, Vec<String>>,
}

impl<C> Default for DeferredIndex<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            waiters: HashMap::new(),
        }
    }
}

impl<C: Clone> DeferredIndex<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `config` under `key`, blocked on `prerequisite`.
    ///
    /// Deferring a key again replaces the previous entry, including the
    /// prerequisite it waits on.
    pub fn defer(
        &mut self,
        key: impl Into<String>,
        prerequisite: impl Into<String>,
        config: C,
        reason: BlockingReason,
    ) {
        let key = key.into();
        let prerequisite = prerequisite.into();
        self.remove(&key);

        self.waiters
            .entry(prerequisite.clone())
            .or_default()
            .push(key.clone());
        self.entries.insert(
            key.clone(),
            PendingEntry {
                key,
                prerequisite,
                config,
                reason,
            },
        );
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&PendingEntry<C>> {
        self.entries.get(key)
    }

    /// Removes the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<PendingEntry<C>> {
        let entry = self.entries.remove(key)?;
        if let Some(keys) = self.waiters.get_mut(&entry.prerequisite) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.waiters.remove(&entry.prerequisite);
            }
        }
        Some(entry)
    }

    /// Removes and returns every entry blocked on `prerequisite`, in the
    /// order they were deferred.
    pub fn take_blocked_on(&mut self, prerequisite: &str) -> Vec<PendingEntry<C>> {
        let keys = self.waiters.remove(prerequisite).unwrap_or_default();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect()
    }

    /// Returns the keys blocked on `prerequisite` without removing them.
    pub fn blocked_on(&self, prerequisite: &str) -> Vec<String> {
        self.waiters.get(prerequisite).cloned().unwrap_or_default()
    }

    /// Returns all pending keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copies every entry, sorted by key.
    pub fn dump(&self) -> Vec<PendingEntry<C>> {
        let mut entries: Vec<PendingEntry<C>> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.waiters.clear();
    }
}
