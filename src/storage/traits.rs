use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A normalized response kept for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(text: String) -> Self {
        Self {
            text,
            inserted_at: Utc::now(),
        }
    }
}

/// Shared response cache.
///
/// Lookups and inserts are safe from any number of concurrent tasks. Nothing is
/// ordered across distinct keys, and two callers racing on the same missing key both
/// go to the backend; the later insert wins.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn insert(&self, key: String, text: String);
    fn remove(&self, key: &str) -> Option<String>;
    fn len(&self) -> usize;
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decides which entries a cache drops.
pub trait EvictionPolicy: Send + Sync {
    /// Whether an entry may no longer be served.
    fn is_expired(&self, _entry: &CacheEntry, _now: DateTime<Utc>) -> bool {
        false
    }

    /// How many of the oldest entries to drop when the cache holds `len` entries.
    fn overflow(&self, _len: usize) -> usize {
        0
    }
}

/// Keep everything until the process exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEviction;

impl EvictionPolicy for NoEviction {}

/// Entries older than `ttl` are treated as missing.
#[derive(Debug, Clone, Copy)]
pub struct TtlEviction {
    pub ttl: Duration,
}

impl EvictionPolicy for TtlEviction {
    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at > self.ttl
    }
}

/// Keep at most `max_entries`, dropping the oldest inserts first.
#[derive(Debug, Clone, Copy)]
pub struct CapacityEviction {
    pub max_entries: usize,
}

impl EvictionPolicy for CapacityEviction {
    fn overflow(&self, len: usize) -> usize {
        len.saturating_sub(self.max_entries)
    }
}

/// Both policies apply: an entry expires if either says so, and the larger overflow wins.
impl<A: EvictionPolicy, B: EvictionPolicy> EvictionPolicy for (A, B) {
    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.0.is_expired(entry, now) || self.1.is_expired(entry, now)
    }

    fn overflow(&self, len: usize) -> usize {
        self.0.overflow(len).max(self.1.overflow(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_eviction() {
        let policy = TtlEviction {
            ttl: Duration::seconds(60),
        };
        let entry = CacheEntry::new("x".to_string());

        assert!(!policy.is_expired(&entry, entry.inserted_at + Duration::seconds(30)));
        assert!(policy.is_expired(&entry, entry.inserted_at + Duration::seconds(61)));
    }

    #[test]
    fn test_capacity_overflow() {
        let policy = CapacityEviction { max_entries: 2 };
        assert_eq!(policy.overflow(1), 0);
        assert_eq!(policy.overflow(2), 0);
        assert_eq!(policy.overflow(5), 3);
    }

    #[test]
    fn test_no_eviction_keeps_everything() {
        let entry = CacheEntry::new("x".to_string());
        assert!(!NoEviction.is_expired(&entry, entry.inserted_at + Duration::days(365)));
        assert_eq!(NoEviction.overflow(usize::MAX), 0);
    }

    #[test]
    fn test_combined_policies() {
        let policy = (
            TtlEviction {
                ttl: Duration::seconds(60),
            },
            CapacityEviction { max_entries: 3 },
        );
        let entry = CacheEntry::new("x".to_string());

        assert!(policy.is_expired(&entry, entry.inserted_at + Duration::seconds(61)));
        assert_eq!(policy.overflow(4), 1);
        assert_eq!(policy.overflow(3), 0);
    }
}
