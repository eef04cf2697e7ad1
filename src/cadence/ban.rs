//! BanRegistry: derived view over the reminder ledger.
//!
//! A subject is banned while its latest closed cycle is younger than
//! [`BAN_LAPSE_MONTHS`]. Nothing is stored; every answer is computed from
//! the ledger snapshot.

use chrono::NaiveDate;

use super::ledger::ReminderLedger;
use super::model::{BAN_LAPSE_MONTHS, MAX_ACTIVE_COUNT, ReminderRecord, months_elapsed, same_subject};

pub struct BanRegistry<'a> {
    records: &'a [ReminderRecord],
}

impl<'a> BanRegistry<'a> {
    pub fn new(ledger: &'a ReminderLedger) -> Self {
        Self::from_records(ledger.records())
    }

    pub fn from_records(records: &'a [ReminderRecord]) -> Self {
        Self { records }
    }

    /// The row that decides the ban: the most recent closed cycle matching `subject`.
    pub fn most_relevant(&self, subject: &str) -> Option<&'a ReminderRecord> {
        self.records
            .iter()
            .filter(|r| r.escalation_count > MAX_ACTIVE_COUNT && same_subject(&r.subject_id, subject))
            .max_by_key(|r| r.last_action_date)
    }

    pub fn is_banned(&self, subject: &str, today: NaiveDate) -> bool {
        self.most_relevant(subject)
            .is_some_and(|r| !months_elapsed(r.last_action_date, today, BAN_LAPSE_MONTHS))
    }
}
