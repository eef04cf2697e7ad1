//! Persisted reminder cadence and message template.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::ledger::Cadence;
use super::model::TableRecord;
use super::table::Table;
use crate::error::{BatchError, RecordError};
use crate::store::{Collection, RecordStore, Row};

pub const DEFAULT_CADENCE_DAYS: u32 = 3;

pub const DEFAULT_REMINDER_MESSAGE: &str = "Hi {name},\n\n\
I reached out a few days ago and wanted to check whether you had a chance to read my message. \
I would be glad to hear from you.\n\n\
Kind regards,\n{sender}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub cadence_days: u32,
    pub message: String,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            cadence_days: DEFAULT_CADENCE_DAYS,
            message: DEFAULT_REMINDER_MESSAGE.to_string(),
        }
    }
}

impl TableRecord for ReminderSettings {
    const COLLECTION: Collection = Collection::ReminderSettings;

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        let malformed = |reason: String| RecordError::Malformed {
            collection: Self::COLLECTION.as_str(),
            reason,
        };
        if row.len() != 2 {
            return Err(malformed(format!("expected 2 fields, got {}", row.len())));
        }
        let cadence_days = row[0]
            .trim()
            .parse()
            .map_err(|e| malformed(format!("bad cadence {:?}: {e}", row[0])))?;
        Ok(Self {
            cadence_days,
            message: row[1].clone(),
        })
    }

    fn to_row(&self) -> Row {
        vec![self.cadence_days.to_string(), self.message.clone()]
    }

    /// Single-row collection: the first row wins.
    fn normalize(mut records: Vec<Self>) -> Vec<Self> {
        records.truncate(1);
        records
    }
}

impl ReminderSettings {
    pub fn cadence(&self) -> Result<Cadence, BatchError> {
        Cadence::days(self.cadence_days)
    }

    /// Explicit values win over stored ones, stored ones over defaults.
    /// The result is written back when it differs from what was stored.
    pub async fn resolve(
        store: &dyn RecordStore,
        cadence_days: Option<u32>,
        message: Option<String>,
    ) -> Result<Self, BatchError> {
        if let Some(0) = cadence_days {
            return Err(BatchError::InvalidCadence(0));
        }

        let mut table: Table<Self> = Table::load(store).await?;
        let stored = table.records().first().cloned();
        let base = stored.clone().unwrap_or_default();
        let resolved = Self {
            cadence_days: cadence_days.unwrap_or(base.cadence_days),
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(base.message),
        };
        resolved.cadence()?;

        if stored.as_ref() != Some(&resolved) || table.malformed_count() > 0 {
            *table.records_mut() = vec![resolved.clone()];
            table.discard_malformed();
            table.save(store).await?;
            info!(cadence_days = resolved.cadence_days, "Reminder settings updated");
        }
        Ok(resolved)
    }
}
