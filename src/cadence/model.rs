//! Core types for the cadence engine: persisted records, row codecs,
//! calendar windows, and per-subject decisions.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::store::{Collection, Row};

/// Date format for every persisted date field.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Minimum gap before a brand-new outreach repeats to the same subject.
pub const THROTTLE_MONTHS: u32 = 6;

/// Period after which a maxed-out reminder cycle no longer blocks contact.
pub const BAN_LAPSE_MONTHS: u32 = 12;

/// Highest escalation count of an active cycle.
pub const MAX_ACTIVE_COUNT: u8 = 4;

/// Escalation count of a closed, archived cycle.
pub const TERMINAL_COUNT: u8 = 5;

// ── Calendar helpers ────────────────────────────────────────────────

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Whole days from `since` to `today` (negative if `since` is in the future).
pub fn days_elapsed(since: NaiveDate, today: NaiveDate) -> i64 {
    (today - since).num_days()
}

/// True when at least `months` calendar months separate `since` and `today`.
///
/// A date exactly `months` back counts as elapsed.
pub fn months_elapsed(since: NaiveDate, today: NaiveDate, months: u32) -> bool {
    match today.checked_sub_months(Months::new(months)) {
        Some(cutoff) => since <= cutoff,
        None => false,
    }
}

/// Subject references match exactly or on their trailing path segment,
/// so a chat url `.../berichten/42` and a profile id `42` refer to the same subject.
pub fn same_subject(a: &str, b: &str) -> bool {
    let a = a.trim();
    let b = b.trim();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || trailing_segment(a) == trailing_segment(b)
}

/// True when a stored reference names the bare id `id`: equal to it, or a
/// path ending in it. A path-shaped `id` only matches itself.
pub fn refers_to(reference: &str, id: &str) -> bool {
    let reference = reference.trim();
    let id = id.trim();
    if reference.is_empty() || id.is_empty() {
        return false;
    }
    reference == id || (!id.contains('/') && trailing_segment(reference) == id)
}

fn trailing_segment(s: &str) -> &str {
    s.trim_end_matches('/').rsplit('/').next().unwrap_or(s)
}

// ── Typed records ───────────────────────────────────────────────────

/// A record type persisted as positional text rows in one collection.
pub trait TableRecord: Clone + Sized {
    const COLLECTION: Collection;

    fn from_row(row: &[String]) -> Result<Self, RecordError>;

    fn to_row(&self) -> Row;

    /// Merge duplicates and order deterministically before a write.
    fn normalize(records: Vec<Self>) -> Vec<Self>;
}

fn malformed<T: TableRecord>(reason: impl Into<String>) -> RecordError {
    RecordError::Malformed {
        collection: T::COLLECTION.as_str(),
        reason: reason.into(),
    }
}

fn expect_fields<T: TableRecord>(row: &[String], count: usize) -> Result<(), RecordError> {
    if row.len() != count {
        return Err(malformed::<T>(format!(
            "expected {count} fields, got {}",
            row.len()
        )));
    }
    Ok(())
}

fn parse_subject<T: TableRecord>(raw: &str) -> Result<String, RecordError> {
    let subject = raw.trim();
    if subject.is_empty() {
        return Err(malformed::<T>("empty subject id"));
    }
    Ok(subject.to_string())
}

fn parse_date<T: TableRecord>(raw: &str) -> Result<NaiveDate, RecordError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| malformed::<T>(format!("bad date {raw:?}: {e}")))
}

/// Last first-contact date per subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub subject_id: String,
    pub last_contact_date: NaiveDate,
}

impl TableRecord for ContactRecord {
    const COLLECTION: Collection = Collection::ContactThrottle;

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        expect_fields::<Self>(row, 2)?;
        Ok(Self {
            subject_id: parse_subject::<Self>(&row[0])?,
            last_contact_date: parse_date::<Self>(&row[1])?,
        })
    }

    fn to_row(&self) -> Row {
        vec![self.subject_id.clone(), format_date(self.last_contact_date)]
    }

    /// One row per subject, keeping the latest date.
    fn normalize(records: Vec<Self>) -> Vec<Self> {
        let mut latest: BTreeMap<String, NaiveDate> = BTreeMap::new();
        for record in records {
            latest
                .entry(record.subject_id)
                .and_modify(|d| *d = (*d).max(record.last_contact_date))
                .or_insert(record.last_contact_date);
        }
        latest
            .into_iter()
            .map(|(subject_id, last_contact_date)| Self {
                subject_id,
                last_contact_date,
            })
            .collect()
    }
}

/// One reminder cycle for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub subject_id: String,
    pub last_action_date: NaiveDate,
    pub escalation_count: u8,
}

impl ReminderRecord {
    pub fn new(subject_id: impl Into<String>, last_action_date: NaiveDate, escalation_count: u8) -> Self {
        Self {
            subject_id: subject_id.into(),
            last_action_date,
            escalation_count,
        }
    }

    /// Closed cycles are history and never change again.
    pub fn is_terminal(&self) -> bool {
        self.escalation_count >= TERMINAL_COUNT
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl TableRecord for ReminderRecord {
    const COLLECTION: Collection = Collection::ReminderLedger;

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        expect_fields::<Self>(row, 3)?;
        let count: u8 = row[2]
            .trim()
            .parse()
            .map_err(|e| malformed::<Self>(format!("bad escalation count {:?}: {e}", row[2])))?;
        if count > TERMINAL_COUNT {
            return Err(malformed::<Self>(format!(
                "escalation count {count} out of range 0..={TERMINAL_COUNT}"
            )));
        }
        Ok(Self {
            subject_id: parse_subject::<Self>(&row[0])?,
            last_action_date: parse_date::<Self>(&row[1])?,
            escalation_count: count,
        })
    }

    fn to_row(&self) -> Row {
        vec![
            self.subject_id.clone(),
            format_date(self.last_action_date),
            self.escalation_count.to_string(),
        ]
    }

    /// Drop exact duplicates; per subject put active rows before terminal
    /// history, newest first.
    fn normalize(records: Vec<Self>) -> Vec<Self> {
        let mut seen = HashSet::new();
        let mut unique: Vec<Self> = records
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();
        unique.sort_by(|a, b| {
            (
                &a.subject_id,
                a.is_terminal(),
                Reverse(a.last_action_date),
                Reverse(a.escalation_count),
            )
                .cmp(&(
                    &b.subject_id,
                    b.is_terminal(),
                    Reverse(b.last_action_date),
                    Reverse(b.escalation_count),
                ))
        });
        unique
    }
}

/// Explicit deny-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub subject_id: String,
}

impl TableRecord for BlacklistEntry {
    const COLLECTION: Collection = Collection::Blacklist;

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        expect_fields::<Self>(row, 1)?;
        Ok(Self {
            subject_id: parse_subject::<Self>(&row[0])?,
        })
    }

    fn to_row(&self) -> Row {
        vec![self.subject_id.clone()]
    }

    fn normalize(records: Vec<Self>) -> Vec<Self> {
        let mut ids: Vec<String> = records.into_iter().map(|e| e.subject_id).collect();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .map(|subject_id| Self { subject_id })
            .collect()
    }
}

// ── Batch inputs and outputs ────────────────────────────────────────

/// A subject offered to a batch, with an optional display name for templating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub subject: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Candidate {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Why a message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendKind {
    /// New outreach gated by the contact throttle.
    FirstContact,
    /// First tick for a subject without a ledger record.
    Initial,
    /// Follow-up within an active cycle.
    Reminder,
    /// Previous cycle lapsed; a fresh one starts.
    NewCycle,
}

/// Why a subject was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Blacklisted,
    Unresolved,
    TooSoon,
    BanActive,
    RecentlyContacted,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Send { kind: SendKind },
    Skip { reason: SkipReason },
}

/// Exactly one outcome per subject per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub subject: String,
    #[serde(flatten)]
    pub action: Action,
    /// Escalation count after this tick, when the ledger was consulted.
    pub new_escalation_count: Option<u8>,
    /// Delivery outcome for sends; `None` for skips.
    pub delivered: Option<bool>,
}

impl Decision {
    pub fn skip(subject: impl Into<String>, reason: SkipReason, count: Option<u8>) -> Self {
        Self {
            subject: subject.into(),
            action: Action::Skip { reason },
            new_escalation_count: count,
            delivered: None,
        }
    }

    pub fn send(subject: impl Into<String>, kind: SendKind, count: Option<u8>, delivered: bool) -> Self {
        Self {
            subject: subject.into(),
            action: Action::Send { kind },
            new_escalation_count: count,
            delivered: Some(delivered),
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self.action, Action::Send { .. })
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.action {
            Action::Skip { reason } => Some(reason),
            Action::Send { .. } => None,
        }
    }
}
