use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Called with each evicted entry while the cache mutex is held; closing an
/// epoch here may block, which is fine — cache users do not hold other
/// contended locks across cache calls.
pub type EvictHook<V> = Box<dyn Fn(i64, V) + Send + Sync>;

struct Inner<V> {
    capacity: usize,
    map: HashMap<i64, V>,
    order: VecDeque<i64>,
}

/// A bounded cache keyed by epoch start time with deterministic FIFO
/// eviction: the least recently *inserted* key goes first, and `get` does
/// not refresh order. Evicted values are handed to the eviction hook.
pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    evict: EvictHook<V>,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: usize, evict: EvictHook<V>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            evict,
        }
    }

    /// Insert an entry, evicting the oldest insertions once over capacity.
    pub fn add(&self, key: i64, value: V) {
        let mut inner = self.inner.lock();
        if inner.map.insert(key, value).is_none() {
            inner.order.push_back(key);
        }
        while inner.map.len() > inner.capacity {
            Self::evict_one(&mut inner, &self.evict);
        }
    }

    /// FIFO discipline: lookups do not touch the eviction order.
    pub fn get(&self, key: i64) -> Option<V> {
        self.inner.lock().map.get(&key).cloned()
    }

    /// Same as `get`, for call sites that want the no-touch contract
    /// explicit — e.g. the re-check inside a double-checked epoch load.
    pub fn peek(&self, key: i64) -> Option<V> {
        self.get(key)
    }

    /// Remove an entry without invoking the eviction hook. The stale order
    /// slot is skipped lazily by later evictions.
    pub fn remove(&self, key: i64) -> Option<V> {
        self.inner.lock().map.remove(&key)
    }

    /// Shrink (or grow) capacity, evicting immediately while over it.
    pub fn resize(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        while inner.map.len() > inner.capacity {
            Self::evict_one(&mut inner, &self.evict);
        }
    }

    /// Evict everything.
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        while !inner.map.is_empty() {
            Self::evict_one(&mut inner, &self.evict);
        }
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.lock().map.values().cloned().collect()
    }

    fn evict_one(inner: &mut Inner<V>, hook: &EvictHook<V>) {
        while let Some(key) = inner.order.pop_front() {
            if let Some(value) = inner.map.remove(&key) {
                (hook)(key, value);
                return;
            }
            // key was removed out of band; skip its stale order slot
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_cache(capacity: usize) -> (Cache<u32>, Arc<Mutex<Vec<i64>>>) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let hook_log = Arc::clone(&evicted);
        let cache = Cache::new(
            capacity,
            Box::new(move |key, _value| hook_log.lock().push(key)),
        );
        (cache, evicted)
    }

    #[test]
    fn test_fifo_eviction_order() {
        let (cache, evicted) = counting_cache(2);
        cache.add(1, 10);
        cache.add(2, 20);
        cache.add(3, 30);

        assert_eq!(*evicted.lock(), vec![1]);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.get(2), Some(20));
        assert_eq!(cache.get(3), Some(30));
    }

    #[test]
    fn test_get_does_not_refresh_order() {
        let (cache, evicted) = counting_cache(2);
        cache.add(1, 10);
        cache.add(2, 20);
        // touching key 1 must not save it: insertion order rules
        assert_eq!(cache.get(1), Some(10));
        cache.add(3, 30);
        assert_eq!(*evicted.lock(), vec![1]);
    }

    #[test]
    fn test_reinsert_keeps_original_slot() {
        let (cache, evicted) = counting_cache(2);
        cache.add(1, 10);
        cache.add(2, 20);
        cache.add(1, 11); // overwrite, order unchanged
        cache.add(3, 30);
        assert_eq!(*evicted.lock(), vec![1]);
        assert_eq!(cache.get(2), Some(20));
    }

    #[test]
    fn test_remove_skips_hook() {
        let (cache, evicted) = counting_cache(2);
        cache.add(1, 10);
        assert_eq!(cache.remove(1), Some(10));
        assert!(evicted.lock().is_empty());

        // the stale order slot does not break later evictions
        cache.add(2, 20);
        cache.add(3, 30);
        cache.add(4, 40);
        assert_eq!(*evicted.lock(), vec![2]);
    }

    #[test]
    fn test_resize_evicts_immediately() {
        let (cache, evicted) = counting_cache(3);
        cache.add(1, 10);
        cache.add(2, 20);
        cache.add(3, 30);
        cache.resize(1);
        assert_eq!(*evicted.lock(), vec![1, 2]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_purge_closes_everything() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&count);
        let cache: Cache<u32> = Cache::new(
            4,
            Box::new(move |_key, _value| {
                hook_count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        cache.add(1, 10);
        cache.add(2, 20);
        cache.purge();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
