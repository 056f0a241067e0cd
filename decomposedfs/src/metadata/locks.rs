use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

/// Only sweep released entries once the table grows past this size.
const SWEEP_THRESHOLD: usize = 1024;

/// In-process metadata locks, one per node location.
///
/// Entries are created on demand and dropped once no guard references them
/// anymore.
#[derive(Default)]
pub struct NodeLocks {
    locks: Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>,
}

/// Holds the metadata lock of a node until dropped.
#[must_use = "the node is unlocked as soon as the guard is dropped"]
pub struct NodeLockGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl NodeLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for NodeLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLockGuard")
            .field("path", &self.path)
            .finish()
    }
}

impl NodeLocks {
    fn entry(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() > SWEEP_THRESHOLD {
            locks.retain(|_, l| l.strong_count() > 0);
        }
        if let Some(lock) = locks.get(path).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(path.to_owned(), Arc::downgrade(&lock));
        lock
    }

    /// Waits until the metadata lock of the node at `path` is available.
    pub async fn lock(&self, path: &Path) -> NodeLockGuard {
        let guard = self.entry(path).lock_owned().await;
        NodeLockGuard {
            path: path.to_owned(),
            _guard: guard,
        }
    }

    /// Takes the lock if it is free right now.
    pub fn try_lock(&self, path: &Path) -> Option<NodeLockGuard> {
        let guard = self.entry(path).try_lock_owned().ok()?;
        Some(NodeLockGuard {
            path: path.to_owned(),
            _guard: guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::NodeLocks;

    #[tokio::test]
    async fn serializes_same_path() {
        let locks = NodeLocks::default();
        let guard = locks.lock(Path::new("/a")).await;

        assert!(locks.try_lock(Path::new("/a")).is_none());
        assert!(locks.try_lock(Path::new("/b")).is_some());

        drop(guard);
        assert!(locks.try_lock(Path::new("/a")).is_some());
    }
}
