//! BlacklistGuard: explicit deny-list, the highest-priority veto.
//!
//! Membership is time-independent and lasts until explicitly removed.
//! Entries may be stored as full references (profile urls) or bare ids; a
//! bare profile id is vetoed by either form.

use serde::Serialize;
use tracing::{info, warn};

use super::model::{BlacklistEntry, refers_to};
use super::table::Table;
use crate::error::{BlacklistError, StoreError};
use crate::store::RecordStore;

/// Result of a blacklist mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistChange {
    Added,
    AlreadyPresent,
    Removed,
    NotPresent,
}

/// Snapshot of the deny-list.
#[derive(Debug, Clone)]
pub struct BlacklistGuard {
    table: Table<BlacklistEntry>,
}

impl BlacklistGuard {
    pub async fn load(store: &dyn RecordStore) -> Result<Self, StoreError> {
        Ok(Self {
            table: Table::load(store).await?,
        })
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: Table::from_records(
                ids.into_iter()
                    .map(|id| BlacklistEntry {
                        subject_id: id.into(),
                    })
                    .collect(),
            ),
        }
    }

    /// Exact membership of a raw subject reference.
    pub fn contains(&self, reference: &str) -> bool {
        let reference = reference.trim();
        self.table
            .records()
            .iter()
            .any(|entry| entry.subject_id == reference)
    }

    /// Whether a resolved profile id is vetoed, by a bare entry or by a
    /// reference ending in it.
    pub fn blocks_profile(&self, profile_id: &str) -> bool {
        self.table
            .records()
            .iter()
            .any(|entry| refers_to(&entry.subject_id, profile_id))
    }

    pub fn list(&self) -> Vec<String> {
        self.table
            .records()
            .iter()
            .map(|entry| entry.subject_id.clone())
            .collect()
    }

    /// Add an id and persist. No-op with a notice if already present.
    pub async fn add(
        &mut self,
        store: &dyn RecordStore,
        id: &str,
    ) -> Result<BlacklistChange, BlacklistError> {
        let id = normalize(id)?;
        if self.blocks_profile(&id) {
            warn!(subject = %id, "Subject is already blacklisted");
            return Ok(BlacklistChange::AlreadyPresent);
        }

        self.table.records_mut().push(BlacklistEntry {
            subject_id: id.clone(),
        });
        if let Err(e) = self.table.save(store).await {
            self.table.records_mut().pop();
            return Err(e.into());
        }
        info!(subject = %id, "Subject added to blacklist");
        Ok(BlacklistChange::Added)
    }

    /// Remove an id and persist. A bare id also removes references ending in
    /// it. No-op with a notice if absent.
    pub async fn remove(
        &mut self,
        store: &dyn RecordStore,
        id: &str,
    ) -> Result<BlacklistChange, BlacklistError> {
        let id = normalize(id)?;
        if !self.blocks_profile(&id) {
            warn!(subject = %id, "Subject is not on the blacklist");
            return Ok(BlacklistChange::NotPresent);
        }

        let previous = self.table.records().to_vec();
        self.table
            .records_mut()
            .retain(|e| !refers_to(&e.subject_id, &id));
        if let Err(e) = self.table.save(store).await {
            *self.table.records_mut() = previous;
            return Err(e.into());
        }
        info!(subject = %id, "Subject removed from blacklist");
        Ok(BlacklistChange::Removed)
    }
}

fn normalize(id: &str) -> Result<String, BlacklistError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(BlacklistError::EmptySubject);
    }
    Ok(id.to_string())
}
