#![forbid(unsafe_code)]

//! Access lists: the (instance, key) pairs read during one tracked computation.
//!
//! An [`AccessList`] is keyed by registrar identity; each entry carries a weak
//! handle to the registrar and the set of keys read from it. Lists built by
//! nested computations fold into their parent with [`AccessList::merge`],
//! a per-instance union of key sets.

use std::fmt;
use std::sync::{Arc, Weak};

use ahash::{AHashMap, AHashSet};

use crate::key::PropertyKey;
use crate::registrar::{RegistrarId, RegistrarInner};

#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) registrar: Weak<RegistrarInner>,
    pub(crate) keys: AHashSet<PropertyKey>,
}

impl Entry {
    fn new(registrar: Weak<RegistrarInner>) -> Self {
        Self {
            registrar,
            keys: AHashSet::new(),
        }
    }
}

/// Properties read during one tracked computation, grouped by instance.
#[derive(Clone, Default)]
pub struct AccessList {
    entries: AHashMap<RegistrarId, Entry>,
}

impl AccessList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no property was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct instances read from.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total number of (instance, key) pairs.
    #[must_use]
    pub fn access_count(&self) -> usize {
        self.entries.values().map(|entry| entry.keys.len()).sum()
    }

    /// Whether `key` was read from the instance owning `registrar`.
    #[must_use]
    pub fn contains(&self, registrar: RegistrarId, key: PropertyKey) -> bool {
        self.entries
            .get(&registrar)
            .is_some_and(|entry| entry.keys.contains(&key))
    }

    /// Keys read from the instance owning `registrar`, sorted.
    #[must_use]
    pub fn keys(&self, registrar: RegistrarId) -> Vec<PropertyKey> {
        let mut keys: Vec<PropertyKey> = self
            .entries
            .get(&registrar)
            .map(|entry| entry.keys.iter().copied().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Identities of every instance read from.
    pub fn registrars(&self) -> impl Iterator<Item = RegistrarId> + '_ {
        self.entries.keys().copied()
    }

    /// Fold `other` into `self`: per-instance union of key sets.
    pub fn merge(&mut self, other: AccessList) {
        for (id, entry) in other.entries {
            match self.entries.get_mut(&id) {
                Some(existing) => existing.keys.extend(entry.keys),
                None => {
                    self.entries.insert(id, entry);
                }
            }
        }
    }

    pub(crate) fn add_access(&mut self, registrar: &Arc<RegistrarInner>, key: PropertyKey) {
        self.entries
            .entry(registrar.id())
            .or_insert_with(|| Entry::new(Arc::downgrade(registrar)))
            .keys
            .insert(key);
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = (RegistrarId, Entry)> {
        self.entries.into_iter()
    }
}

impl fmt::Debug for AccessList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for id in self.registrars() {
            map.entry(&id, &self.keys(id));
        }
        map.finish()
    }
}
