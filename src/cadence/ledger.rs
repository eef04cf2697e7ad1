//! ReminderLedger: per-subject escalation state machine.
//!
//! ```text
//! NEW(0) → REMINDED(1) → REMINDED(2) → REMINDED(3) → REMINDED(4) → TERMINAL(5, archived)
//! ```
//!
//! One tick per subject per batch. Rules, in evaluation order:
//! 1. no record → open `{subject, today, 0}`, send
//! 2. fewer than `cadence` days since the last action → skip, too soon
//! 3. count < 4 → `{subject, today, count + 1}`, send
//! 4. count == 4, last action under 12 months ago → skip, ban active
//! 5. count == 4, last action 12+ months ago → close as `{subject, today, 5}`,
//!    open `{subject, today, 0}`, send
//!
//! Evaluation is separated from application so the caller can decide, after
//! delivery, whether the transition is committed.

use chrono::NaiveDate;
use tracing::debug;

use super::model::{
    BAN_LAPSE_MONTHS, Decision, MAX_ACTIVE_COUNT, ReminderRecord, SendKind, SkipReason,
    TERMINAL_COUNT, days_elapsed, months_elapsed,
};
use super::table::Table;
use crate::error::{BatchError, StoreError};
use crate::store::RecordStore;

/// Minimum number of days between two reminders to one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence(u32);

impl Cadence {
    pub fn days(days: u32) -> Result<Self, BatchError> {
        if days == 0 {
            return Err(BatchError::InvalidCadence(days));
        }
        Ok(Self(days))
    }

    pub fn as_days(&self) -> u32 {
        self.0
    }
}

/// Outcome of evaluating one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No record yet; a new cycle opens at 0.
    Open,
    /// Cadence has not elapsed since the last action.
    TooSoon { count: u8 },
    /// Active cycle moves one step up.
    Advance { index: usize, to: u8 },
    /// Cycle is maxed out and still within the ban window.
    BanActive { count: u8 },
    /// Maxed-out cycle lapsed; it is closed and a new one opens.
    Renew { index: usize },
}

impl Transition {
    pub fn is_send(&self) -> bool {
        matches!(
            self,
            Transition::Open | Transition::Advance { .. } | Transition::Renew { .. }
        )
    }

    /// Escalation count of the subject's active cycle once applied.
    pub fn new_escalation_count(&self) -> u8 {
        match *self {
            Transition::Open | Transition::Renew { .. } => 0,
            Transition::Advance { to, .. } => to,
            Transition::TooSoon { count } | Transition::BanActive { count } => count,
        }
    }

    /// Build the reported decision. `delivered` is ignored for skips.
    pub fn decision(&self, subject: &str, delivered: bool) -> Decision {
        let count = Some(self.new_escalation_count());
        match self {
            Transition::Open => Decision::send(subject, SendKind::Initial, count, delivered),
            Transition::Advance { .. } => {
                Decision::send(subject, SendKind::Reminder, count, delivered)
            }
            Transition::Renew { .. } => {
                Decision::send(subject, SendKind::NewCycle, count, delivered)
            }
            Transition::TooSoon { .. } => Decision::skip(subject, SkipReason::TooSoon, count),
            Transition::BanActive { .. } => Decision::skip(subject, SkipReason::BanActive, count),
        }
    }
}

/// The reminder history of every subject.
#[derive(Debug, Clone)]
pub struct ReminderLedger {
    table: Table<ReminderRecord>,
}

impl ReminderLedger {
    pub async fn load(store: &dyn RecordStore) -> Result<Self, StoreError> {
        Ok(Self {
            table: Table::load(store).await?,
        })
    }

    pub fn from_records(records: Vec<ReminderRecord>) -> Self {
        Self {
            table: Table::from_records(records),
        }
    }

    pub fn records(&self) -> &[ReminderRecord] {
        self.table.records()
    }

    /// Index of the row that governs `subject`: the first active row in read
    /// order, or the first row at all when only closed history exists.
    fn authoritative_index(&self, subject: &str) -> Option<usize> {
        let subject = subject.trim();
        let records = self.table.records();
        records
            .iter()
            .position(|r| r.subject_id == subject && r.is_active())
            .or_else(|| records.iter().position(|r| r.subject_id == subject))
    }

    /// The row that governs `subject`, if any.
    pub fn current(&self, subject: &str) -> Option<&ReminderRecord> {
        self.authoritative_index(subject)
            .map(|i| &self.table.records()[i])
    }

    /// Decide the tick for `subject` without mutating anything.
    pub fn evaluate(&self, subject: &str, cadence: Cadence, today: NaiveDate) -> Transition {
        let Some(index) = self.authoritative_index(subject) else {
            return Transition::Open;
        };
        let record = &self.table.records()[index];
        let count = record.escalation_count;
        let elapsed = days_elapsed(record.last_action_date, today);

        if elapsed < i64::from(cadence.as_days()) {
            Transition::TooSoon { count }
        } else if count < MAX_ACTIVE_COUNT {
            Transition::Advance {
                index,
                to: count + 1,
            }
        } else if !months_elapsed(record.last_action_date, today, BAN_LAPSE_MONTHS) {
            Transition::BanActive { count }
        } else {
            Transition::Renew { index }
        }
    }

    /// Commit a transition produced by [`evaluate`](Self::evaluate) for the
    /// same subject, with no other mutation in between.
    pub fn apply(&mut self, subject: &str, transition: &Transition, today: NaiveDate) {
        let subject = subject.trim();
        match *transition {
            Transition::TooSoon { .. } | Transition::BanActive { .. } => {}
            Transition::Open => {
                self.table
                    .records_mut()
                    .push(ReminderRecord::new(subject, today, 0));
            }
            Transition::Advance { index, to } => {
                self.table.records_mut()[index] = ReminderRecord::new(subject, today, to);
            }
            Transition::Renew { index } => {
                let records = self.table.records_mut();
                if records[index].is_active() {
                    records[index] = ReminderRecord::new(subject, today, TERMINAL_COUNT);
                }
                records.push(ReminderRecord::new(subject, today, 0));
            }
        }
        debug!(subject = %subject, transition = ?transition, "Ledger transition applied");
    }

    /// Evaluate and immediately apply.
    pub fn tick(&mut self, subject: &str, cadence: Cadence, today: NaiveDate) -> Transition {
        let transition = self.evaluate(subject, cadence, today);
        self.apply(subject, &transition, today);
        transition
    }

    pub fn is_dirty(&self) -> bool {
        self.table.is_dirty()
    }

    /// Write the whole ledger back if any tick mutated it.
    pub async fn save_if_dirty(&mut self, store: &dyn RecordStore) -> Result<bool, StoreError> {
        self.table.save_if_dirty(store).await
    }
}
