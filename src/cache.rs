//! Page view caching with LRU eviction

use crate::query::PageView;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(n) => n,
    None => unreachable!(),
};

pub struct PageCache {
    cache: Mutex<LruCache<u16, Arc<PageView>>>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached view for `page`, building and storing it on a miss.
    /// A builder returning `None` is not cached.
    pub fn get_or_build<F>(&self, page: u16, build: F) -> Option<Arc<PageView>>
    where
        F: FnOnce() -> Option<PageView>,
    {
        if let Some(view) = self.lock().get(&page) {
            return Some(Arc::clone(view));
        }

        let view = Arc::new(build()?);
        self.lock().put(page, Arc::clone(&view));
        Some(view)
    }

    pub fn stats(&self) -> (usize, usize) {
        let cache = self.lock();
        (cache.len(), cache.cap().get())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<u16, Arc<PageView>>> {
        // A poisoned cache only holds immutable views, so the data is still usable
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
