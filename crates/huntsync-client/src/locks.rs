//! Named liveness locks shared by the agent and its tabs.
//!
//! Each tab holds a lock named after its [`TabId`](huntsync_types::TabId) for
//! as long as it lives. The agent waits on [`LockManager::released`]; once the
//! lock becomes acquirable the tab is gone, whether or not it said goodbye.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock {0:?} is already held")]
    AlreadyHeld(String),
}

/// Table of named locks. Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the named lock. Fails rather than waits if someone holds it.
    pub fn hold(&self, name: &str) -> Result<LockGuard, LockError> {
        let lock = Arc::clone(
            self.table
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = lock
            .try_lock_owned()
            .map_err(|_| LockError::AlreadyHeld(name.to_string()))?;
        Ok(LockGuard {
            name: name.to_string(),
            table: Arc::clone(&self.table),
            _guard: guard,
        })
    }

    /// Resolves once the named lock is free. Immediately if nobody holds it.
    pub fn released(&self, name: &str) -> impl Future<Output = ()> + Send + 'static {
        let lock = self.table.get(name).map(|e| Arc::clone(e.value()));
        async move {
            if let Some(lock) = lock {
                drop(lock.lock().await);
            }
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.table
            .get(name)
            .is_some_and(|e| e.value().try_lock().is_err())
    }
}

/// Releases its lock on drop.
pub struct LockGuard {
    name: String,
    table: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Waiters keep their own handle to the mutex, so they still wake when
        // `_guard` drops after this.
        self.table.remove(&self.name);
    }
}
