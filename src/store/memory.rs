//! In-process `RecordStore` with failure injection and write counting.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::traits::{Collection, RecordStore, Row};

/// Which operation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
}

/// Volatile store. Used by tests and for throwaway runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<Collection, Vec<Row>>>,
    failures: RwLock<HashSet<(Collection, StoreOp)>>,
    puts: RwLock<HashMap<Collection, usize>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection without counting it as a write.
    pub async fn seed(&self, collection: Collection, rows: Vec<Row>) {
        self.collections.write().await.insert(collection, rows);
    }

    /// Make every subsequent `op` on `collection` fail with `Unavailable`.
    pub async fn fail_on(&self, collection: Collection, op: StoreOp) {
        self.failures.write().await.insert((collection, op));
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Number of successful `put_all` calls for a collection.
    pub async fn put_count(&self, collection: Collection) -> usize {
        self.puts.read().await.get(&collection).copied().unwrap_or(0)
    }

    /// Snapshot of a collection's current rows.
    pub async fn rows(&self, collection: Collection) -> Vec<Row> {
        self.collections
            .read()
            .await
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    async fn check(&self, collection: Collection, op: StoreOp) -> Result<(), StoreError> {
        if self.failures.read().await.contains(&(collection, op)) {
            return Err(StoreError::Unavailable {
                collection: collection.as_str(),
                reason: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_all(&self, collection: Collection) -> Result<Vec<Row>, StoreError> {
        self.check(collection, StoreOp::Get).await?;
        Ok(self.rows(collection).await)
    }

    async fn put_all(&self, collection: Collection, rows: &[Row]) -> Result<(), StoreError> {
        self.check(collection, StoreOp::Put).await?;
        self.collections
            .write()
            .await
            .insert(collection, rows.to_vec());
        *self.puts.write().await.entry(collection).or_insert(0) += 1;
        Ok(())
    }
}
