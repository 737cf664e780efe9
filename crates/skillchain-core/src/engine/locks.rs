//! Per-execution async locks.
//!
//! Every mutating engine call for one execution id runs under that id's
//! lock, so outcome reports and operator commands for the same execution
//! are applied one at a time within a process. Different executions never
//! contend. Entries are dropped once nobody holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use skillchain_types::execution::ExecutionId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ExecutionLocks {
    inner: DashMap<ExecutionId, Arc<Mutex<()>>>,
}

/// Held while an engine call mutates one execution.
pub struct ExecutionGuard<'a> {
    locks: &'a ExecutionLocks,
    id: ExecutionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: ExecutionId) -> ExecutionGuard<'_> {
        let mutex = self
            .inner
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        ExecutionGuard {
            locks: self,
            id,
            guard: Some(guard),
        }
    }

    /// Number of executions with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits on it.
        self.locks
            .inner
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
