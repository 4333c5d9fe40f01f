use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Resolved channel names keyed by channel id, shared between tasks.
#[derive(Clone)]
pub struct ChannelCache {
    cache: Arc<Mutex<LruCache<u64, String>>>,
}

impl ChannelCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn insert(&self, channel_id: u64, name: String) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(channel_id, name);
    }

    pub fn get(&self, channel_id: u64) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&channel_id).cloned()
    }

    pub fn invalidate(&self, channel_id: u64) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.pop(&channel_id);
    }
}
