//! ContactThrottle: six-month cool-down on first-contact outreach.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use super::ban::BanRegistry;
use super::model::{ContactRecord, THROTTLE_MONTHS, months_elapsed};
use super::table::Table;
use crate::error::StoreError;
use crate::store::RecordStore;

/// Whether a first-contact message may go out now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    RecentlyContacted { last_contact_date: NaiveDate },
    Banned,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

#[derive(Debug, Clone)]
pub struct ContactThrottle {
    table: Table<ContactRecord>,
}

impl ContactThrottle {
    pub async fn load(store: &dyn RecordStore) -> Result<Self, StoreError> {
        Ok(Self {
            table: Table::load(store).await?,
        })
    }

    pub fn from_records(records: Vec<ContactRecord>) -> Self {
        Self {
            table: Table::from_records(records),
        }
    }

    pub fn records(&self) -> &[ContactRecord] {
        self.table.records()
    }

    /// Latest recorded contact, across duplicate rows.
    pub fn last_contact(&self, subject: &str) -> Option<NaiveDate> {
        let subject = subject.trim();
        self.table
            .records()
            .iter()
            .filter(|r| r.subject_id == subject)
            .map(|r| r.last_contact_date)
            .max()
    }

    /// A subject never contacted before is always eligible. Otherwise the
    /// last contact must be six months back and no ban may be active.
    pub fn is_eligible(&self, subject: &str, today: NaiveDate, bans: &BanRegistry<'_>) -> Eligibility {
        let Some(last_contact_date) = self.last_contact(subject) else {
            return Eligibility::Eligible;
        };
        if !months_elapsed(last_contact_date, today, THROTTLE_MONTHS) {
            return Eligibility::RecentlyContacted { last_contact_date };
        }
        if bans.is_banned(subject, today) {
            return Eligibility::Banned;
        }
        Eligibility::Eligible
    }

    /// Upsert the contact date. Only moves forward; returns whether anything changed.
    ///
    /// Callers record a contact only after an eligible send went out.
    pub fn record_contact(&mut self, subject: &str, today: NaiveDate) -> bool {
        let subject = subject.trim();
        if self.last_contact(subject).is_some_and(|last| last >= today) {
            debug!(subject = %subject, "Contact date already current");
            return false;
        }

        let records = self.table.records_mut();
        match records.iter_mut().find(|r| r.subject_id == subject) {
            Some(record) => record.last_contact_date = today,
            None => records.push(ContactRecord {
                subject_id: subject.to_string(),
                last_contact_date: today,
            }),
        }
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.table.is_dirty()
    }

    pub async fn save_if_dirty(&mut self, store: &dyn RecordStore) -> Result<bool, StoreError> {
        self.table.save_if_dirty(store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::model::{DATE_FORMAT, ReminderRecord};
    use crate::store::{Collection, MemoryRecordStore};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn contact(subject: &str, date: &str) -> ContactRecord {
        ContactRecord {
            subject_id: subject.into(),
            last_contact_date: d(date),
        }
    }

    #[test]
    fn unknown_subject_is_eligible() {
        let throttle = ContactThrottle::from_records(vec![]);
        let bans = BanRegistry::from_records(&[]);
        assert_eq!(throttle.is_eligible("X", d("2024-01-01"), &bans), Eligibility::Eligible);
    }

    #[test]
    fn six_month_cool_down() {
        let throttle = ContactThrottle::from_records(vec![contact("X", "2024-01-01")]);
        let bans = BanRegistry::from_records(&[]);
        assert_eq!(
            throttle.is_eligible("X", d("2024-06-30"), &bans),
            Eligibility::RecentlyContacted {
                last_contact_date: d("2024-01-01")
            }
        );
        assert!(throttle.is_eligible("X", d("2024-07-01"), &bans).is_eligible());
    }

    #[test]
    fn ban_blocks_after_cool_down() {
        let throttle = ContactThrottle::from_records(vec![contact("X", "2023-06-01")]);
        let ledger = [ReminderRecord::new("X", d("2024-01-01"), 5)];
        let bans = BanRegistry::from_records(&ledger);
        assert_eq!(throttle.is_eligible("X", d("2024-03-01"), &bans), Eligibility::Banned);
        assert!(throttle.is_eligible("X", d("2025-01-01"), &bans).is_eligible());
    }

    #[test]
    fn record_contact_never_moves_backwards() {
        let mut throttle = ContactThrottle::from_records(vec![contact("X", "2024-05-01")]);
        assert!(!throttle.record_contact("X", d("2024-04-01")));
        assert!(!throttle.record_contact("X", d("2024-05-01")));
        assert!(!throttle.is_dirty());
        assert_eq!(throttle.last_contact("X"), Some(d("2024-05-01")));

        assert!(throttle.record_contact("X", d("2024-12-01")));
        assert_eq!(throttle.last_contact("X"), Some(d("2024-12-01")));
    }

    #[tokio::test]
    async fn new_contacts_persist_sorted() {
        let store = MemoryRecordStore::new();
        let mut throttle = ContactThrottle::load(&store).await.unwrap();
        throttle.record_contact("b", d("2024-01-02"));
        throttle.record_contact("a", d("2024-01-02"));
        assert!(throttle.save_if_dirty(&store).await.unwrap());
        assert_eq!(
            store.rows(Collection::ContactThrottle).await,
            vec![
                vec!["a".to_string(), "2024-01-02".to_string()],
                vec!["b".to_string(), "2024-01-02".to_string()],
            ]
        );
    }
}
