//! Bounded LRU cache for embedding vectors.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

/// Concurrent get/put cache keyed by the exact (prefixed) input text.
///
/// Vectors are shared via `Arc` so a hit never copies the payload.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        self.inner.lock().expect("cache lock poisoned").get(key).cloned()
    }

    pub fn put(&self, key: String, value: Arc<Vec<f32>>) {
        self.inner.lock().expect("cache lock poisoned").put(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2);
        cache.put("a".into(), Arc::new(vec![1.0]));
        cache.put("b".into(), Arc::new(vec![2.0]));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c".into(), Arc::new(vec![3.0]));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }
}
