//! Per-volume-name serialisation of lifecycle operations.
//!
//! At most one Create/Remove/Mount/Unmount runs for a given name at a time.
//! Operations on different names never wait on each other. Entries are
//! dropped from the table once no holder or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Named-lock table layered above the registry.
#[derive(Debug, Default)]
pub struct NameLocks {
    table: Arc<LockTable>,
}

impl NameLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `name` is free and returns a guard that
    /// releases it on drop.
    pub async fn acquire(&self, name: &str) -> NameGuard {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                table
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = entry.lock_owned().await;
        NameGuard {
            name: name.to_owned(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    /// Number of names with a holder or waiter.
    #[must_use]
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Holds the lock for one volume name.
#[derive(Debug)]
pub struct NameGuard {
    name: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameGuard {
    /// Name this guard serialises.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table itself still references the mutex: nobody waits.
        if table
            .get(&self.name)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(&self.name);
        }
    }
}
