use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CachedEmbedding {
    vector: Arc<Vec<f32>>,
    inserted_at: Instant,
}

/// Bounded LRU cache of embeddings with a time-to-live.
///
/// Keys are content hashes scoped by backend name, so switching models never
/// serves vectors from another model. Cloning shares the underlying cache.
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Arc<Mutex<LruCache<String, CachedEmbedding>>>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CachedEmbedding>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        let mut cache = self.lock();
        let expired = match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                return Some(Arc::clone(&entry.vector));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    pub fn put(&self, key: String, vector: Vec<f32>) {
        let mut cache = self.lock();
        cache.put(
            key,
            CachedEmbedding {
                vector: Arc::new(vector),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
