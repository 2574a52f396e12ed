//! Application-owned cache of constructed clients.
//!
//! Clients are looked up by a [`CacheKey`] derived from their configuration
//! and created on a miss. Equal configurations share one client handle.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::StreamResult;

/// Canonical identity of a configuration.
///
/// Built from the configuration's JSON form with object keys sorted, so
/// field order never affects equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Canonicalizes a serializable configuration.
    pub fn canonical<C: Serialize + ?Sized>(config: &C) -> StreamResult<Self> {
        let value = sort_keys(serde_json::to_value(config)?);
        Ok(Self(serde_json::to_string(&value)?))
    }

    /// The canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rebuilds every object with keys inserted in ascending order.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Cache mapping configuration keys to shared client handles.
pub struct ClientCache<T> {
    entries: RwLock<HashMap<CacheKey, Arc<T>>>,
}

impl<T> ClientCache<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached handle for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Returns the handle for `key`, creating it with `create` on a miss.
    ///
    /// `create` runs at most once per key even under concurrent callers.
    pub fn get_or_insert_with<F>(&self, key: CacheKey, create: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get(&key) {
            return existing;
        }

        let mut entries = self.entries.write();
        entries
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!("Creating cached client");
                Arc::new(create())
            })
            .clone()
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with) for fallible
    /// constructors. Nothing is cached when `create` fails.
    pub fn try_get_or_insert_with<F, E>(&self, key: CacheKey, create: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        let created = Arc::new(create()?);
        tracing::debug!("Creating cached client");
        entries.insert(key, created.clone());
        Ok(created)
    }

    /// Removes and returns the handle for `key`.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<T>> {
        self.entries.write().remove(key)
    }

    /// Drops every cached handle.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T> Default for ClientCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ClientCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_key_ignores_field_order() {
        let a = CacheKey::canonical(&json!({"base_url": "x", "timeout": 5, "nested": {"b": 1, "a": 2}}))
            .unwrap();
        let b = CacheKey::canonical(&json!({"nested": {"a": 2, "b": 1}, "timeout": 5, "base_url": "x"}))
            .unwrap();
        assert_eq!(a, b);

        let c = CacheKey::canonical(&json!({"base_url": "y", "timeout": 5})).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_create_on_miss_once() {
        let cache: ClientCache<String> = ClientCache::new();
        let created = AtomicUsize::new(0);
        let key = CacheKey::canonical(&json!({"k": 1})).unwrap();

        let first = cache.get_or_insert_with(key.clone(), || {
            created.fetch_add(1, Ordering::SeqCst);
            "client".to_string()
        });
        let second = cache.get_or_insert_with(key.clone(), || {
            created.fetch_add(1, Ordering::SeqCst);
            "other".to_string()
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        assert!(cache.remove(&key).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        let cache: ClientCache<u32> = ClientCache::new();
        let key = CacheKey::canonical(&json!({"k": 2})).unwrap();

        let result: Result<_, &str> = cache.try_get_or_insert_with(key.clone(), || Err("nope"));
        assert!(result.is_err());
        assert!(cache.get(&key).is_none());

        let value = cache
            .try_get_or_insert_with::<_, &str>(key.clone(), || Ok(7))
            .unwrap();
        assert_eq!(*value, 7);
    }
}
