use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Cache borné partagé entre appels : éviction LRU à capacité pleine,
/// expiration propre à chaque entrée.
pub struct ResultCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> ResultCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock();
        let expired = match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.lock().put(key, entry);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key).map(|e| e.value)
    }

    /// Retire toutes les entrées expirées ; retourne leur nombre.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.lock();
        let stale: Vec<K> = cache
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k)
            .cloned()
            .collect::<Vec<_>>();
        for key in &stale {
            cache.pop(key);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_get() {
        let cache: ResultCache<String, u32> = ResultCache::new(4, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_lru_eviction() {
        let cache: ResultCache<u32, u32> = ResultCache::new(2, Duration::from_secs(60));
        cache.insert(1, 10);
        cache.insert(2, 20);
        assert_eq!(cache.get(&1), Some(10));
        cache.insert(3, 30);
        assert_eq!(cache.get(&2), None, "2 est le moins récemment utilisé");
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_per_entry_expiry() {
        let cache: ResultCache<u32, u32> = ResultCache::new(4, Duration::from_secs(60));
        cache.insert_with_ttl(1, 10, Duration::ZERO);
        cache.insert(2, 20);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.len(), 1, "l'entrée expirée est retirée à la lecture");
    }

    #[test]
    fn test_purge_expired() {
        let cache: ResultCache<u32, u32> = ResultCache::new(8, Duration::ZERO);
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.insert_with_ttl(3, 3, Duration::from_secs(60));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache: Arc<ResultCache<u32, u32>> = Arc::new(ResultCache::new(16, Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.insert(t * 100 + i, i);
                        let _ = cache.get(&(t * 100 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
