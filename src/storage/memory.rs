use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::traits::{CacheEntry, EvictionPolicy, NoEviction, ResponseCache};

struct Slot {
    // Insert order; timestamps can tie.
    seq: u64,
    entry: CacheEntry,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

/// Process-local cache behind a read/write lock.
#[derive(Clone)]
pub struct InMemoryCache {
    inner: Arc<RwLock<Inner>>,
    policy: Arc<dyn EvictionPolicy>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_policy(Arc::new(NoEviction))
    }

    pub fn with_policy(policy: Arc<dyn EvictionPolicy>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            policy,
        }
    }

    /// Entry with its insertion timestamp, if present and not expired.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        {
            let inner = self.inner.read();
            match inner.slots.get(key) {
                None => return None,
                Some(slot) if !self.policy.is_expired(&slot.entry, now) => {
                    return Some(slot.entry.clone())
                }
                Some(_) => {}
            }
        }

        let mut inner = self.inner.write();
        // Re-check under the write lock; a fresh insert may have replaced it.
        if let Some(slot) = inner.slots.get(key) {
            if self.policy.is_expired(&slot.entry, now) {
                inner.slots.remove(key);
                log::debug!("Dropped expired cache entry");
            } else {
                return Some(slot.entry.clone());
            }
        }
        None
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entry(key).map(|entry| entry.text)
    }

    fn insert(&self, key: String, text: String) {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(
            key,
            Slot {
                seq,
                entry: CacheEntry::new(text),
            },
        );

        let overflow = self.policy.overflow(inner.slots.len());
        if overflow > 0 {
            let mut by_age: Vec<(u64, String)> = inner
                .slots
                .iter()
                .map(|(k, slot)| (slot.seq, k.clone()))
                .collect();
            by_age.sort_unstable();
            for (_, victim) in by_age.into_iter().take(overflow) {
                inner.slots.remove(&victim);
            }
            log::debug!("Evicted {} cache entries", overflow);
        }
    }

    fn remove(&self, key: &str) -> Option<String> {
        self.inner.write().slots.remove(key).map(|slot| slot.entry.text)
    }

    fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    fn clear(&self) {
        self.inner.write().slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::{CapacityEviction, TtlEviction};

    #[test]
    fn test_insert_and_get() {
        let cache = InMemoryCache::new();
        assert!(cache.is_empty());

        cache.insert("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let cache = InMemoryCache::new();
        cache.insert("k".to_string(), "first".to_string());
        cache.insert("k".to_string(), "second".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = InMemoryCache::with_policy(Arc::new(CapacityEviction { max_entries: 2 }));
        cache.insert("a".to_string(), "1".to_string());
        cache.insert("b".to_string(), "2".to_string());
        cache.insert("c".to_string(), "3".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = InMemoryCache::with_policy(Arc::new(TtlEviction {
            ttl: chrono::Duration::seconds(-1),
        }));
        cache.insert("k".to_string(), "v".to_string());

        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_has_timestamp() {
        let before = Utc::now();
        let cache = InMemoryCache::new();
        cache.insert("k".to_string(), "v".to_string());

        let entry = cache.entry("k").unwrap();
        assert!(entry.inserted_at >= before);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_on_distinct_keys() {
        let cache = InMemoryCache::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.insert(format!("key-{}", i), format!("value-{}", i));
                cache.get(&format!("key-{}", i))
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(format!("value-{}", i)));
        }
        assert_eq!(cache.len(), 32);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = InMemoryCache::new();
        cache.insert("a".to_string(), "1".to_string());
        cache.insert("b".to_string(), "2".to_string());

        assert_eq!(cache.remove("a").as_deref(), Some("1"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
