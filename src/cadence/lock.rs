//! Per-collection exclusion for in-flight batches.
//!
//! Whole-collection rewrites lose updates when two writers overlap, so a
//! batch claims every collection it may write before it starts and a second
//! claim on any of them is rejected.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::BatchError;
use crate::store::Collection;

#[derive(Debug, Clone, Default)]
pub struct CollectionLocks {
    held: Arc<Mutex<HashSet<Collection>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim all of `collections` or none of them.
    pub fn try_acquire(&self, collections: &[Collection]) -> Result<CollectionGuard, BatchError> {
        let mut held = self.held_set();
        if let Some(busy) = collections.iter().find(|c| held.contains(*c)) {
            return Err(BatchError::InFlight {
                collection: busy.as_str(),
            });
        }
        held.extend(collections.iter().copied());
        debug!(collections = ?collections, "Collections claimed");
        Ok(CollectionGuard {
            locks: self.clone(),
            collections: collections.to_vec(),
        })
    }

    pub fn is_held(&self, collection: Collection) -> bool {
        self.held_set().contains(&collection)
    }

    fn held_set(&self) -> MutexGuard<'_, HashSet<Collection>> {
        // The set stays consistent even if a holder panicked.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its collections when dropped.
#[derive(Debug)]
pub struct CollectionGuard {
    locks: CollectionLocks,
    collections: Vec<Collection>,
}

impl CollectionGuard {
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        let mut held = self.locks.held_set();
        for collection in &self.collections {
            held.remove(collection);
        }
    }
}
