//! Advisory cache of child name to id resolutions.
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use lru::LruCache;
use parking_lot::Mutex;

use crate::ids::NodeId;

/// Caches the id bound to a (parent location, name) pair.
///
/// Every operation that changes or removes a binding must [IdCache::remove]
/// the affected keys. Correctness never depends on a hit.
pub trait IdCache: Send + Sync {
    fn get(&self, parent: &Path, name: &str) -> Option<NodeId>;
    fn set(&self, parent: &Path, name: &str, id: NodeId);
    fn remove(&self, parent: &Path, name: &str);
}

/// Bounded least-recently-used cache.
pub struct LruIdCache {
    cache: Mutex<LruCache<PathBuf, NodeId>>,
}

impl LruIdCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl IdCache for LruIdCache {
    fn get(&self, parent: &Path, name: &str) -> Option<NodeId> {
        self.cache.lock().get(&parent.join(name)).cloned()
    }

    fn set(&self, parent: &Path, name: &str, id: NodeId) {
        self.cache.lock().put(parent.join(name), id);
    }

    fn remove(&self, parent: &Path, name: &str) {
        self.cache.lock().pop(&parent.join(name));
    }
}

/// A cache that never hits.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopIdCache;

impl IdCache for NoopIdCache {
    fn get(&self, _parent: &Path, _name: &str) -> Option<NodeId> {
        None
    }

    fn set(&self, _parent: &Path, _name: &str, _id: NodeId) {}

    fn remove(&self, _parent: &Path, _name: &str) {}
}

/// Builds a cache holding up to `capacity` entries, 0 disables caching.
pub fn with_capacity(capacity: usize) -> Arc<dyn IdCache> {
    match NonZeroUsize::new(capacity) {
        Some(capacity) => Arc::new(LruIdCache::new(capacity)),
        None => Arc::new(NoopIdCache),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::with_capacity;
    use crate::ids::NodeId;

    #[test]
    fn set_get_remove() {
        let cache = with_capacity(2);
        let id = NodeId::try_from("child-0001").unwrap();
        let parent = Path::new("/nodes/ab/cd");

        assert_eq!(None, cache.get(parent, "a"));
        cache.set(parent, "a", id.clone());
        assert_eq!(Some(id), cache.get(parent, "a"));
        cache.remove(parent, "a");
        assert_eq!(None, cache.get(parent, "a"));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = with_capacity(1);
        let parent = Path::new("/p");
        cache.set(parent, "a", NodeId::try_from("child-0001").unwrap());
        cache.set(parent, "b", NodeId::try_from("child-0002").unwrap());
        assert_eq!(None, cache.get(parent, "a"));
        assert!(cache.get(parent, "b").is_some());
    }

    #[test]
    fn disabled_always_misses() {
        let cache = with_capacity(0);
        cache.set(Path::new("/p"), "a", NodeId::try_from("child-0001").unwrap());
        assert_eq!(None, cache.get(Path::new("/p"), "a"));
    }
}
