//! The informer's in-memory cache of observed objects.
use std::{collections::HashMap, sync::Arc};

use ahash::RandomState;
use app_sdk_core::{metadata::ObjectIdentifier, object::Object};
use parking_lot::RwLock;

/// An identity-keyed cache of the latest observed state of a kind's objects.
///
/// Reads and writes are serialised internally; values are shared snapshots,
/// so readers never observe a partially applied event.
#[derive(Default)]
pub struct Store {
    inner: RwLock<HashMap<ObjectIdentifier, Arc<dyn Object>, RandomState>>,
}

impl Store {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached object for an identifier, if present
    pub fn get(&self, key: &ObjectIdentifier) -> Option<Arc<dyn Object>> {
        self.inner.read().get(key).cloned()
    }

    /// Upsert an object under its own identity, returning the previous state
    pub fn insert(&self, obj: Arc<dyn Object>) -> Option<Arc<dyn Object>> {
        let key = obj.static_metadata().identifier();
        self.inner.write().insert(key, obj)
    }

    /// Remove an identifier, returning the previous state
    pub fn remove(&self, key: &ObjectIdentifier) -> Option<Arc<dyn Object>> {
        self.inner.write().remove(key)
    }

    /// A snapshot of all cached objects
    pub fn state(&self) -> Vec<Arc<dyn Object>> {
        self.inner.read().values().cloned().collect()
    }

    /// A snapshot of all cached entries with their identifiers
    pub fn entries(&self) -> Vec<(ObjectIdentifier, Arc<dyn Object>)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_sdk_core::{metadata::StaticMetadata, object::UntypedObject};

    fn obj(namespace: &str, name: &str, rv: &str) -> Arc<dyn Object> {
        let mut o = UntypedObject::default();
        o.set_static_metadata(StaticMetadata {
            group: "g".into(),
            version: "v1".into(),
            kind: "Thing".into(),
            namespace: namespace.into(),
            name: name.into(),
        });
        o.common_metadata_mut().resource_version = rv.into();
        Arc::new(o)
    }

    #[test]
    fn insert_get_remove() {
        let store = Store::new();
        assert!(store.insert(obj("ns", "a", "1")).is_none());
        let prev = store.insert(obj("ns", "a", "2")).unwrap();
        assert_eq!(prev.common_metadata().resource_version, "1");
        assert_eq!(store.len(), 1);

        let key = ObjectIdentifier::namespaced("ns", "a");
        assert_eq!(store.get(&key).unwrap().common_metadata().resource_version, "2");
        assert!(store.remove(&key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn distinct_namespaces_are_distinct_keys() {
        let store = Store::new();
        store.insert(obj("ns1", "a", "1"));
        store.insert(obj("ns2", "a", "1"));
        assert_eq!(store.len(), 2);
        assert!(store.get(&ObjectIdentifier::namespaced("ns1", "a")).is_some());
        assert!(store.get(&ObjectIdentifier::cluster("a")).is_none());
    }
}
