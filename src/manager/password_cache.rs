//! Single-entry password cache
//!
//! Keeps the most recently used `(credential key, password)` pair so back-to-back
//! connections to the same account do not prompt twice.
//!
//! Policy:
//! - an entry expires `ttl` after it was stored; a zero `ttl` disables caching
//! - lookups match the exact credential key only
//! - expired entries are evicted by the lookup that finds them
//! - `evict` removes the entry only if it belongs to the given key

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

struct CachedPassword {
    key: String,
    password: Zeroizing<String>,
    stored_at: Instant,
}

pub(crate) struct PasswordCache {
    ttl: Duration,
    entry: Mutex<Option<CachedPassword>>,
}

impl PasswordCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self { ttl, entry: Mutex::new(None) }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Zeroizing<String>> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn store(&self, key: String, password: &str) {
        self.store_at(key, password, Instant::now());
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Zeroizing<String>> {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = entry.as_ref()?;
        if cached.key != key {
            return None;
        }
        if now.saturating_duration_since(cached.stored_at) >= self.ttl {
            entry.take();
            tracing::debug!("cached password expired");
            return None;
        }
        Some(cached.password.clone())
    }

    fn store_at(&self, key: String, password: &str, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        *entry = Some(CachedPassword { key, password: Zeroizing::new(password.to_string()), stored_at: now });
    }

    pub(crate) fn evict(&self, key: &str) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        if entry.as_ref().is_some_and(|cached| cached.key == key) {
            entry.take();
        }
    }

    pub(crate) fn clear(&self) {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_hit_within_ttl() {
        let cache = PasswordCache::new(TTL);
        let t0 = Instant::now();
        cache.store_at("alice".into(), "pw-a", t0);
        let hit = cache.get_at("alice", t0 + Duration::from_secs(299)).unwrap();
        assert_eq!(hit.as_str(), "pw-a");
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = PasswordCache::new(TTL);
        let t0 = Instant::now();
        cache.store_at("alice".into(), "pw-a", t0);
        assert!(cache.get_at("alice", t0 + TTL).is_none());
        // Gone for good, even when asked with an earlier clock
        assert!(cache.get_at("alice", t0).is_none());
    }

    #[test]
    fn test_exact_key_only() {
        let cache = PasswordCache::new(TTL);
        cache.store("alice".into(), "pw-a");
        assert!(cache.get("bob").is_none());
        assert!(cache.get("alic").is_none());
        assert!(cache.get("alice").is_some());
    }

    #[test]
    fn test_single_entry_replaced() {
        let cache = PasswordCache::new(TTL);
        cache.store("alice".into(), "pw-a");
        cache.store("bob".into(), "pw-b");
        assert!(cache.get("alice").is_none());
        assert_eq!(cache.get("bob").unwrap().as_str(), "pw-b");
    }

    #[test]
    fn test_evict_only_matching_key() {
        let cache = PasswordCache::new(TTL);
        cache.store("alice".into(), "pw-a");
        cache.evict("bob");
        assert!(cache.get("alice").is_some());
        cache.evict("alice");
        assert!(cache.get("alice").is_none());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = PasswordCache::new(Duration::ZERO);
        cache.store("alice".into(), "pw-a");
        assert!(cache.get("alice").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = PasswordCache::new(TTL);
        cache.store("alice".into(), "pw-a");
        cache.clear();
        assert!(cache.get("alice").is_none());
    }
}
