//! Batch outputs: the per-batch summary and the broadcast event stream.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{Decision, SkipReason};
use crate::store::Collection;

/// Which batch is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Reminders,
    Outreach,
}

impl BatchKind {
    /// Collections a batch of this kind reads and may rewrite.
    pub fn collections(&self) -> &'static [Collection] {
        match self {
            BatchKind::Reminders => &[
                Collection::ReminderLedger,
                Collection::ReminderSettings,
                Collection::Blacklist,
            ],
            BatchKind::Outreach => &[Collection::ContactThrottle, Collection::Blacklist],
        }
    }
}

/// Outcome of one completed (or stopped) batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub kind: BatchKind,
    pub today: NaiveDate,
    pub decisions: Vec<Decision>,
    /// Set when the stop flag cut the batch short.
    pub stopped: bool,
    /// Collections that were rewritten at the end of the batch.
    pub persisted: Vec<Collection>,
}

impl BatchReport {
    pub fn new(batch_id: Uuid, kind: BatchKind, today: NaiveDate) -> Self {
        Self {
            batch_id,
            kind,
            today,
            decisions: Vec::new(),
            stopped: false,
            persisted: Vec::new(),
        }
    }

    pub fn sent(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_send()).count()
    }

    pub fn delivered(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.delivered == Some(true))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.decisions.len() - self.sent()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.skip_reason() == Some(reason))
            .count()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            processed: self.decisions.len(),
            sent: self.sent(),
            delivered: self.delivered(),
            skipped: self.skipped(),
            stopped: self.stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub sent: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub stopped: bool,
}

/// Progress notifications fanned out to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        batch_id: Uuid,
        kind: BatchKind,
        today: NaiveDate,
    },
    Decision {
        batch_id: Uuid,
        decision: Decision,
    },
    Finished {
        batch_id: Uuid,
        kind: BatchKind,
        summary: BatchSummary,
    },
    Failed {
        batch_id: Uuid,
        kind: BatchKind,
        error: String,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            BatchEvent::Started { batch_id, .. }
            | BatchEvent::Decision { batch_id, .. }
            | BatchEvent::Finished { batch_id, .. }
            | BatchEvent::Failed { batch_id, .. } => *batch_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::model::SendKind;

    #[test]
    fn summary_counts() {
        let mut report = BatchReport::new(Uuid::new_v4(), BatchKind::Reminders, NaiveDate::MIN);
        report.decisions = vec![
            Decision::send("a", SendKind::Reminder, Some(1), true),
            Decision::send("b", SendKind::Initial, Some(0), false),
            Decision::skip("c", SkipReason::TooSoon, Some(2)),
            Decision::skip("d", SkipReason::Blacklisted, None),
        ];
        let summary = report.summary();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(report.skipped_for(SkipReason::Blacklisted), 1);
    }

    #[test]
    fn event_is_tagged() {
        let id = Uuid::new_v4();
        let event = BatchEvent::Decision {
            batch_id: id,
            decision: Decision::skip("x", SkipReason::BanActive, Some(4)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "decision");
        assert_eq!(json["decision"]["reason"], "ban_active");
        assert_eq!(event.batch_id(), id);
    }
}
