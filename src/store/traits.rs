//! `RecordStore` trait: the single async interface for all persistence.
//!
//! Every collection is a flat table of positional text rows. There is no
//! row-level update: callers read the whole collection, mutate in memory and
//! write the whole collection back.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One persisted row: ordered text fields, no header.
pub type Row = Vec<String>;

/// The named tables the engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// `(subject_id, last_contact_date)`
    ContactThrottle,
    /// `(subject_id, last_action_date, escalation_count)`
    ReminderLedger,
    /// `(subject_id)`
    Blacklist,
    /// `(cadence_days, message)`, at most one row.
    ReminderSettings,
}

impl Collection {
    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::ContactThrottle => "contact_throttle",
            Collection::ReminderLedger => "reminder_ledger",
            Collection::Blacklist => "blacklist",
            Collection::ReminderSettings => "reminder_settings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-agnostic whole-collection store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read every row of a collection in stored order.
    /// An absent collection is an empty sequence, not an error.
    async fn get_all(&self, collection: Collection) -> Result<Vec<Row>, StoreError>;

    /// Atomically replace the entire collection.
    async fn put_all(&self, collection: Collection, rows: &[Row]) -> Result<(), StoreError>;
}
