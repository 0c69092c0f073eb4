//! Per-participant write serialization
//!
//! One async mutex per participant key, created on first use and dropped
//! again once nobody holds or waits for it. Different keys never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily populated table of per-key mutexes
#[derive(Default)]
pub struct KeyedLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> KeyedGuard<'_> {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let guard = slot.lock_owned().await;

        KeyedGuard {
            table: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is live
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive access to one key; released on drop
pub struct KeyedGuard<'a> {
    table: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard<'_> {
    /// Key this guard protects
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Holders and waiters each keep a clone; the table alone means idle
        self.table
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}
