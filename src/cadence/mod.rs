//! Contact cadence engine: blacklist, throttle, bans, reminder ledger and
//! the controller that runs them over a batch.

pub mod ban;
pub mod blacklist;
pub mod compose;
pub mod controller;
pub mod ledger;
pub mod lock;
pub mod model;
pub mod report;
pub mod runner;
pub mod settings;
pub mod table;
pub mod throttle;
pub mod unanswered;

pub use ban::BanRegistry;
pub use blacklist::{BlacklistChange, BlacklistGuard};
pub use controller::{BatchPermit, CadenceController, OutreachBatch, ReminderBatch};
pub use ledger::{Cadence, ReminderLedger, Transition};
pub use model::{Candidate, Decision, SendKind, SkipReason};
pub use report::{BatchEvent, BatchKind, BatchReport, BatchSummary};
pub use runner::{BatchHandle, StopSignal, spawn_outreach_batch, spawn_reminder_batch};
pub use settings::ReminderSettings;
pub use throttle::{ContactThrottle, Eligibility};
pub use unanswered::{ChatThread, ThreadMessage, unanswered_candidates};
