//! In-memory [`CacheStore`] backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{CacheStore, Namespace};
use crate::errors::CacheError;

type Entries = BTreeMap<(&'static str, String), String>;

/// A [`CacheStore`] held entirely in process memory.
///
/// All operations take one lock, which makes `put_all` atomic.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries().get(&(ns.as_str(), key.to_string())).cloned())
    }

    fn put_all(&self, entries: &[(Namespace, &str, &str)]) -> Result<(), CacheError> {
        let mut map = self.entries();
        for (ns, key, value) in entries {
            map.insert((ns.as_str(), key.to_string()), value.to_string());
        }
        Ok(())
    }

    fn keys(&self, ns: Namespace) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries()
            .keys()
            .filter(|(n, _)| *n == ns.as_str())
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn clear(&self, namespaces: &[Namespace]) -> Result<(), CacheError> {
        let names: Vec<&str> = namespaces.iter().map(Namespace::as_str).collect();
        self.entries().retain(|(n, _), _| !names.contains(n));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_are_isolated() {
        let store = MemoryStore::new();
        store.put(Namespace::Nodes, "a", "node").unwrap();
        store.put(Namespace::Files, "a", "file").unwrap();

        assert_eq!(store.get(Namespace::Nodes, "a").unwrap().as_deref(), Some("node"));
        assert_eq!(store.get(Namespace::Files, "a").unwrap().as_deref(), Some("file"));
        assert!(store.get(Namespace::Session, "a").unwrap().is_none());
    }

    #[test]
    fn test_keys_sorted() {
        let store = MemoryStore::new();
        store.put(Namespace::Nodes, "b", "1").unwrap();
        store.put(Namespace::Nodes, "a", "2").unwrap();
        store.put(Namespace::Files, "c", "3").unwrap();
        assert_eq!(store.keys(Namespace::Nodes).unwrap(), vec!["a", "b"]);
    }
}
