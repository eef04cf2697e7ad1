//! Typed whole-collection snapshots.
//!
//! Read-entire → mutate in memory → write-entire. Rows that fail to parse are
//! logged, skipped for decision making, and written back verbatim after the
//! typed rows so nothing is lost on rewrite.

use tracing::warn;

use super::model::TableRecord;
use crate::error::StoreError;
use crate::store::{RecordStore, Row};

/// In-memory copy of one collection.
#[derive(Debug, Clone)]
pub struct Table<T> {
    records: Vec<T>,
    malformed: Vec<Row>,
    dirty: bool,
}

impl<T: TableRecord> Table<T> {
    /// Parse raw rows, setting malformed ones aside.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut records = Vec::with_capacity(rows.len());
        let mut malformed = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            match T::from_row(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(row = index, "Skipping row: {e}");
                    malformed.push(row);
                }
            }
        }
        Self {
            records,
            malformed,
            dirty: false,
        }
    }

    pub fn from_records(records: Vec<T>) -> Self {
        Self {
            records,
            malformed: Vec::new(),
            dirty: false,
        }
    }

    /// Read the whole collection.
    pub async fn load(store: &dyn RecordStore) -> Result<Self, StoreError> {
        let rows = store.get_all(T::COLLECTION).await?;
        Ok(Self::from_rows(rows))
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Mutable access. Marks the table as needing a write.
    pub fn records_mut(&mut self) -> &mut Vec<T> {
        self.dirty = true;
        &mut self.records
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed.len()
    }

    /// Drop set-aside rows so the next save writes typed rows only.
    pub fn discard_malformed(&mut self) {
        if !self.malformed.is_empty() {
            self.malformed.clear();
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Normalized typed rows followed by preserved malformed rows.
    pub fn to_rows(&self) -> Vec<Row> {
        T::normalize(self.records.clone())
            .iter()
            .map(TableRecord::to_row)
            .chain(self.malformed.iter().cloned())
            .collect()
    }

    /// Replace the whole collection in one `put_all`.
    pub async fn save(&mut self, store: &dyn RecordStore) -> Result<(), StoreError> {
        let rows = self.to_rows();
        store.put_all(T::COLLECTION, &rows).await?;
        self.dirty = false;
        Ok(())
    }

    /// Save only if something changed. Returns whether a write happened.
    pub async fn save_if_dirty(&mut self, store: &dyn RecordStore) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        self.save(store).await?;
        Ok(true)
    }
}
