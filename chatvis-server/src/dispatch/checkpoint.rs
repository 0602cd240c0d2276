//! Per `(agent, group)` serialization of checkpoint read-modify-write.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per `(agent_id, group_id)` key.
///
/// A cycle holds the key's guard from the checkpoint read until the checkpoint write, so two
/// overlapping triggers for the same pair can never both see the same unseen window.
/// Different keys never contend.
#[derive(Debug, Default)]
pub struct CheckpointLocks {
    keys: Mutex<HashMap<(i64, i64), Arc<AsyncMutex<()>>>>,
}

pub type CheckpointGuard = OwnedMutexGuard<()>;

impl CheckpointLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(agent_id, group_id)`.
    pub async fn acquire(&self, agent_id: i64, group_id: i64) -> CheckpointGuard {
        let lock = {
            let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(keys.entry((agent_id, group_id)).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of keys that have been locked at least once.
    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
