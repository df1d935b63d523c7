//! Process-wide key/value map with per-entry expiry.
//!
//! Shared by the rate limiter and the referral statistics cache. Expired
//! entries read as absent and are dropped on access; [`ExpiringStore::purge_expired`]
//! sweeps the rest.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ExpiringStore<V> {
    entries: DashMap<String, Entry<V>>,
}

impl<V: Clone> ExpiringStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Like [`get`](Self::get) but evaluated at `now`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
            tracing::debug!("Cache entry expired: key={key}");
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub fn set_at(&self, key: impl Into<String>, value: V, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    pub fn purge_expired_at(&self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of stored entries, including ones that expired but were not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for ExpiringStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn get_missing_key_is_none() {
        let store: ExpiringStore<u64> = ExpiringStore::new();
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn set_then_get_before_expiry() {
        let store = ExpiringStore::new();
        let now = Instant::now();
        store.set_at("k", 7u64, TTL, now);
        assert_eq!(store.get_at("k", now + Duration::from_secs(59)), Some(7));
    }

    #[test]
    fn entry_expires_at_ttl() {
        let store = ExpiringStore::new();
        let now = Instant::now();
        store.set_at("k", 7u64, TTL, now);
        assert_eq!(store.get_at("k", now + TTL), None);
        assert!(store.is_empty());
    }

    #[test]
    fn set_overwrites_and_refreshes_expiry() {
        let store = ExpiringStore::new();
        let now = Instant::now();
        store.set_at("k", 1u64, TTL, now);
        store.set_at("k", 2u64, TTL, now + Duration::from_secs(30));
        assert_eq!(store.get_at("k", now + Duration::from_secs(75)), Some(2));
    }

    #[test]
    fn remove_deletes_entry() {
        let store = ExpiringStore::new();
        store.set("k", 1u64, TTL);
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn purge_expired_keeps_live_entries() {
        let store = ExpiringStore::new();
        let now = Instant::now();
        store.set_at("short", 1u64, Duration::from_secs(5), now);
        store.set_at("long", 2u64, TTL, now);
        store.purge_expired_at(now + Duration::from_secs(10));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_at("long", now + Duration::from_secs(10)), Some(2));
    }
}
