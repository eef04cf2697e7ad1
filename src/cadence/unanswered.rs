//! Unanswered-chat candidate selection.
//!
//! Threads arrive already extracted from the platform; this only decides
//! which of them are due a reminder.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::model::{Candidate, days_elapsed};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub author: String,
    pub sent_on: NaiveDate,
}

/// One conversation with a counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatThread {
    pub subject: String,
    #[serde(default)]
    pub counterpart_name: Option<String>,
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

impl ChatThread {
    pub fn latest_message(&self) -> Option<NaiveDate> {
        self.messages.iter().map(|m| m.sent_on).max()
    }
}

/// Threads that are quiet for at least `cadence_days` and show no counting
/// counterpart response.
///
/// A counterpart message only counts as a response while it is younger
/// than `window_days`; older replies are disregarded.
pub fn unanswered_candidates(
    threads: &[ChatThread],
    counterparts: &[String],
    cadence_days: u32,
    today: NaiveDate,
    window_days: i64,
) -> Vec<Candidate> {
    let counterparts: HashSet<&str> = counterparts.iter().map(|n| n.trim()).collect();
    let mut seen = HashSet::new();

    threads
        .iter()
        .filter(|thread| {
            thread
                .latest_message()
                .is_some_and(|latest| days_elapsed(latest, today) >= i64::from(cadence_days))
        })
        .filter(|thread| {
            !thread.messages.iter().any(|m| {
                counterparts.contains(m.author.trim())
                    && days_elapsed(m.sent_on, today) < window_days
            })
        })
        .filter(|thread| seen.insert(thread.subject.trim().to_string()))
        .map(|thread| Candidate {
            subject: thread.subject.trim().to_string(),
            name: thread.counterpart_name.clone(),
        })
        .collect()
}
