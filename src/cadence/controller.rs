//! CadenceController: runs a batch of subjects through the guards and the
//! ledger, delivers what is due and persists once at the end.
//!
//! Per reminder candidate, in order:
//! 1. blacklist veto on the raw subject
//! 2. profile id resolution (failure skips only this subject)
//! 3. blacklist veto on the resolved id
//! 4. ledger evaluation
//! 5. paced delivery, then ledger commit according to the failure policy
//!
//! Each touched collection is rewritten exactly once after the last subject,
//! including when the batch was stopped early.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ban::BanRegistry;
use super::blacklist::{BlacklistChange, BlacklistGuard};
use super::compose;
use super::ledger::{Cadence, ReminderLedger};
use super::lock::{CollectionGuard, CollectionLocks};
use super::model::{Candidate, Decision, SendKind, SkipReason};
use super::report::{BatchEvent, BatchKind, BatchReport};
use super::runner::StopSignal;
use super::settings::ReminderSettings;
use super::throttle::{ContactThrottle, Eligibility};
use super::unanswered::{ChatThread, unanswered_candidates};
use crate::config::EngineConfig;
use crate::error::{BatchError, BlacklistError, StoreError};
use crate::platform::{Delivery, DeliveryFailurePolicy, ProfileResolver, SendPacing};
use crate::store::{Collection, RecordStore};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Default age beyond which a counterpart reply no longer counts as a response.
pub const DEFAULT_RESPONSE_WINDOW_DAYS: i64 = 60;

/// Input of one reminder batch.
#[derive(Debug, Clone, Deserialize)]
pub struct ReminderBatch {
    /// Explicit candidates, processed first.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Threads to select unanswered candidates from.
    #[serde(default)]
    pub threads: Vec<ChatThread>,
    /// Display names whose messages count as a counterpart response.
    #[serde(default)]
    pub counterparts: Vec<String>,
    pub cadence_days: Option<u32>,
    pub message: Option<String>,
    pub today: NaiveDate,
}

impl ReminderBatch {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            candidates: Vec::new(),
            threads: Vec::new(),
            counterparts: Vec::new(),
            cadence_days: None,
            message: None,
            today,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_threads(mut self, threads: Vec<ChatThread>, counterparts: Vec<String>) -> Self {
        self.threads = threads;
        self.counterparts = counterparts;
        self
    }

    pub fn with_cadence_days(mut self, days: u32) -> Self {
        self.cadence_days = Some(days);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Input of one first-contact outreach batch.
#[derive(Debug, Clone, Deserialize)]
pub struct OutreachBatch {
    pub recipients: Vec<Candidate>,
    pub message: String,
    pub today: NaiveDate,
}

impl OutreachBatch {
    pub fn new(today: NaiveDate, message: impl Into<String>) -> Self {
        Self {
            recipients: Vec::new(),
            message: message.into(),
            today,
        }
    }

    pub fn with_recipients(mut self, recipients: Vec<Candidate>) -> Self {
        self.recipients = recipients;
        self
    }
}

/// Exclusive claim on the collections of one batch kind.
#[derive(Debug)]
pub struct BatchPermit {
    id: Uuid,
    kind: BatchKind,
    _guard: CollectionGuard,
}

impl BatchPermit {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }
}

pub struct CadenceController {
    store: Arc<dyn RecordStore>,
    delivery: Arc<dyn Delivery>,
    resolver: Arc<dyn ProfileResolver>,
    locks: CollectionLocks,
    pacing: SendPacing,
    failure_policy: DeliveryFailurePolicy,
    sender_name: String,
    response_window_days: i64,
    events: broadcast::Sender<BatchEvent>,
}

impl CadenceController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        delivery: Arc<dyn Delivery>,
        resolver: Arc<dyn ProfileResolver>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            store,
            delivery,
            resolver,
            locks: CollectionLocks::new(),
            pacing: SendPacing::default(),
            failure_policy: DeliveryFailurePolicy::default(),
            sender_name: String::new(),
            response_window_days: DEFAULT_RESPONSE_WINDOW_DAYS,
            events,
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        store: Arc<dyn RecordStore>,
        delivery: Arc<dyn Delivery>,
        resolver: Arc<dyn ProfileResolver>,
    ) -> Self {
        Self::new(store, delivery, resolver)
            .with_pacing(SendPacing::new(config.send_delay_min, config.send_delay_max))
            .with_failure_policy(config.failure_policy)
            .with_sender_name(config.sender_name.clone())
            .with_response_window_days(config.response_window_days)
    }

    pub fn with_pacing(mut self, pacing: SendPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_failure_policy(mut self, policy: DeliveryFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn with_response_window_days(mut self, days: i64) -> Self {
        self.response_window_days = days;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Subscribe to batch progress. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// Claim the collections of a batch kind. Fails if any is held.
    pub fn reserve(&self, kind: BatchKind) -> Result<BatchPermit, BatchError> {
        let guard = self.locks.try_acquire(kind.collections())?;
        Ok(BatchPermit {
            id: Uuid::new_v4(),
            kind,
            _guard: guard,
        })
    }

    fn emit(&self, event: BatchEvent) {
        // Ok if no receivers are listening
        let _ = self.events.send(event);
    }

    // ── Reminder batch ──────────────────────────────────────────────────

    /// Reserve and run a reminder batch in the foreground.
    pub async fn run_reminders(&self, batch: ReminderBatch) -> Result<BatchReport, BatchError> {
        let permit = self.reserve(BatchKind::Reminders)?;
        self.execute_reminders(permit, batch, &StopSignal::new()).await
    }

    pub async fn execute_reminders(
        &self,
        permit: BatchPermit,
        batch: ReminderBatch,
        stop: &StopSignal,
    ) -> Result<BatchReport, BatchError> {
        let (id, kind) = (permit.id(), permit.kind());
        self.emit(BatchEvent::Started {
            batch_id: id,
            kind,
            today: batch.today,
        });
        let result = self.reminders_inner(id, batch, stop).await;
        drop(permit);
        self.finish(id, kind, &result);
        result
    }

    async fn reminders_inner(
        &self,
        batch_id: Uuid,
        batch: ReminderBatch,
        stop: &StopSignal,
    ) -> Result<BatchReport, BatchError> {
        let store = self.store.as_ref();
        let today = batch.today;

        let settings = ReminderSettings::resolve(store, batch.cadence_days, batch.message).await?;
        let cadence = settings.cadence()?;
        let blacklist = BlacklistGuard::load(store).await?;
        let mut ledger = ReminderLedger::load(store).await?;

        let selected = unanswered_candidates(
            &batch.threads,
            &batch.counterparts,
            cadence.as_days(),
            today,
            self.response_window_days,
        );
        let candidates = dedup_candidates(batch.candidates.into_iter().chain(selected));

        info!(
            batch_id = %batch_id,
            candidates = candidates.len(),
            cadence_days = cadence.as_days(),
            "Processing reminder batch"
        );

        let mut report = BatchReport::new(batch_id, BatchKind::Reminders, today);
        let mut attempts = 0usize;
        for candidate in &candidates {
            if stop.is_stopped() {
                info!(batch_id = %batch_id, remaining = candidates.len() - report.decisions.len(), "Reminder batch stopped");
                report.stopped = true;
                break;
            }
            let decision = self
                .remind_one(
                    candidate,
                    &blacklist,
                    &mut ledger,
                    cadence,
                    &settings.message,
                    today,
                    &mut attempts,
                )
                .await;
            self.record(&mut report, decision);
        }

        if ledger.save_if_dirty(store).await? {
            info!(batch_id = %batch_id, collection = %Collection::ReminderLedger, "Ledger persisted");
            report.persisted.push(Collection::ReminderLedger);
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn remind_one(
        &self,
        candidate: &Candidate,
        blacklist: &BlacklistGuard,
        ledger: &mut ReminderLedger,
        cadence: Cadence,
        template: &str,
        today: NaiveDate,
        attempts: &mut usize,
    ) -> Decision {
        let subject = candidate.subject.trim();
        if blacklist.contains(subject) {
            return Decision::skip(subject, SkipReason::Blacklisted, None);
        }

        let profile_id = match self.resolver.resolve_profile_id(subject).await {
            Ok(id) => id,
            Err(e) => {
                error!(subject = %subject, error = %e, "Profile id resolution failed");
                return Decision::skip(subject, SkipReason::Unresolved, None);
            }
        };
        if blacklist.blocks_profile(&profile_id) {
            return Decision::skip(subject, SkipReason::Blacklisted, None);
        }

        let transition = ledger.evaluate(subject, cadence, today);
        if !transition.is_send() {
            return transition.decision(subject, false);
        }

        let message = compose::render(template, candidate.name.as_deref(), &self.sender_name);
        let delivered = self.deliver(subject, &message, attempts).await;

        if delivered || self.failure_policy == DeliveryFailurePolicy::Advance {
            ledger.apply(subject, &transition, today);
            return transition.decision(subject, delivered);
        }

        debug!(subject = %subject, "Delivery failed, ledger held");
        let mut decision = transition.decision(subject, false);
        decision.new_escalation_count = ledger.current(subject).map(|r| r.escalation_count);
        decision
    }

    // ── Outreach batch ──────────────────────────────────────────────────

    /// Reserve and run a first-contact outreach batch in the foreground.
    pub async fn run_outreach(&self, batch: OutreachBatch) -> Result<BatchReport, BatchError> {
        let permit = self.reserve(BatchKind::Outreach)?;
        self.execute_outreach(permit, batch, &StopSignal::new()).await
    }

    pub async fn execute_outreach(
        &self,
        permit: BatchPermit,
        batch: OutreachBatch,
        stop: &StopSignal,
    ) -> Result<BatchReport, BatchError> {
        let (id, kind) = (permit.id(), permit.kind());
        self.emit(BatchEvent::Started {
            batch_id: id,
            kind,
            today: batch.today,
        });
        let result = self.outreach_inner(id, batch, stop).await;
        drop(permit);
        self.finish(id, kind, &result);
        result
    }

    async fn outreach_inner(
        &self,
        batch_id: Uuid,
        batch: OutreachBatch,
        stop: &StopSignal,
    ) -> Result<BatchReport, BatchError> {
        let store = self.store.as_ref();
        let today = batch.today;

        let blacklist = BlacklistGuard::load(store).await?;
        let mut throttle = ContactThrottle::load(store).await?;
        let ledger = ReminderLedger::load(store).await?;
        let bans = BanRegistry::new(&ledger);

        let recipients = dedup_candidates(batch.recipients);
        info!(batch_id = %batch_id, recipients = recipients.len(), "Processing outreach batch");

        let mut report = BatchReport::new(batch_id, BatchKind::Outreach, today);
        let mut attempts = 0usize;
        for recipient in &recipients {
            if stop.is_stopped() {
                info!(batch_id = %batch_id, remaining = recipients.len() - report.decisions.len(), "Outreach batch stopped");
                report.stopped = true;
                break;
            }

            let subject = recipient.subject.trim();
            let decision = if blacklist.blocks_profile(subject) {
                Decision::skip(subject, SkipReason::Blacklisted, None)
            } else {
                match throttle.is_eligible(subject, today, &bans) {
                    Eligibility::RecentlyContacted { .. } => {
                        Decision::skip(subject, SkipReason::RecentlyContacted, None)
                    }
                    Eligibility::Banned => Decision::skip(subject, SkipReason::Banned, None),
                    Eligibility::Eligible => {
                        let message = compose::render(
                            &batch.message,
                            recipient.name.as_deref(),
                            &self.sender_name,
                        );
                        let delivered = self.deliver(subject, &message, &mut attempts).await;
                        if delivered {
                            throttle.record_contact(subject, today);
                        }
                        Decision::send(subject, SendKind::FirstContact, None, delivered)
                    }
                }
            };
            self.record(&mut report, decision);
        }

        if throttle.save_if_dirty(store).await? {
            info!(batch_id = %batch_id, collection = %Collection::ContactThrottle, "Contact throttle persisted");
            report.persisted.push(Collection::ContactThrottle);
        }
        Ok(report)
    }

    // ── Blacklist ───────────────────────────────────────────────────────

    pub async fn blacklist_list(&self) -> Result<Vec<String>, StoreError> {
        Ok(BlacklistGuard::load(self.store.as_ref()).await?.list())
    }

    pub async fn blacklist_add(&self, id: &str) -> Result<BlacklistChange, BlacklistError> {
        let _guard = self.claim_blacklist()?;
        let store = self.store.as_ref();
        BlacklistGuard::load(store).await?.add(store, id).await
    }

    pub async fn blacklist_remove(&self, id: &str) -> Result<BlacklistChange, BlacklistError> {
        let _guard = self.claim_blacklist()?;
        let store = self.store.as_ref();
        BlacklistGuard::load(store).await?.remove(store, id).await
    }

    fn claim_blacklist(&self) -> Result<CollectionGuard, BlacklistError> {
        self.locks
            .try_acquire(&[Collection::Blacklist])
            .map_err(|_| BlacklistError::InFlight {
                collection: Collection::Blacklist.as_str(),
            })
    }

    // ── Shared steps ────────────────────────────────────────────────────

    /// Pace (except before the first attempt), then deliver. Failures are
    /// subject-local and only logged.
    async fn deliver(&self, subject: &str, message: &str, attempts: &mut usize) -> bool {
        if *attempts > 0 {
            self.pacing.pause().await;
        }
        *attempts += 1;

        match self.delivery.deliver(subject, message).await {
            Ok(()) => {
                info!(subject = %subject, "Message delivered");
                true
            }
            Err(e) => {
                error!(subject = %subject, error = %e, "Delivery failed");
                false
            }
        }
    }

    fn record(&self, report: &mut BatchReport, decision: Decision) {
        debug!(
            subject = %decision.subject,
            action = ?decision.action,
            new_escalation_count = ?decision.new_escalation_count,
            "Decision"
        );
        self.emit(BatchEvent::Decision {
            batch_id: report.batch_id,
            decision: decision.clone(),
        });
        report.decisions.push(decision);
    }

    fn finish(&self, batch_id: Uuid, kind: BatchKind, result: &Result<BatchReport, BatchError>) {
        match result {
            Ok(report) => {
                let summary = report.summary();
                info!(
                    batch_id = %batch_id,
                    processed = summary.processed,
                    sent = summary.sent,
                    delivered = summary.delivered,
                    skipped = summary.skipped,
                    stopped = summary.stopped,
                    "Batch finished"
                );
                self.emit(BatchEvent::Finished {
                    batch_id,
                    kind,
                    summary,
                });
            }
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "Batch aborted");
                self.emit(BatchEvent::Failed {
                    batch_id,
                    kind,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Trim subjects, drop empty ones and keep the first occurrence of each.
fn dedup_candidates(candidates: impl IntoIterator<Item = Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|mut c| {
            c.subject = c.subject.trim().to_string();
            (!c.subject.is_empty() && seen.insert(c.subject.clone())).then_some(c)
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::{StubDelivery, StubResolver, controller_with};
    use super::*;
    use crate::cadence::model::{Action, DATE_FORMAT, ReminderRecord, TableRecord};
    use crate::cadence::unanswered::ThreadMessage;
    use crate::store::MemoryRecordStore;
    use crate::store::memory::StoreOp;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn candidates(subjects: &[&str]) -> Vec<Candidate> {
        subjects.iter().map(|s| Candidate::new(*s)).collect()
    }

    fn reminders(today: &str, subjects: &[&str]) -> ReminderBatch {
        ReminderBatch::new(d(today))
            .with_candidates(candidates(subjects))
            .with_cadence_days(3)
            .with_message("Hi {name}, {sender} here")
    }

    #[tokio::test]
    async fn blacklisted_subject_is_skipped_without_ledger_row() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(Collection::Blacklist, vec![row(&["Y"])]).await;
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let report = controller.run_reminders(reminders("2024-01-01", &["Y"])).await.unwrap();

        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].skip_reason(), Some(SkipReason::Blacklisted));
        assert!(delivery.sent().is_empty());
        assert!(store.rows(Collection::ReminderLedger).await.is_empty());
        assert_eq!(store.put_count(Collection::ReminderLedger).await, 0);
    }

    #[tokio::test]
    async fn blacklist_on_resolved_id_vetoes() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(Collection::Blacklist, vec![row(&["77"])]).await;
        store
            .seed(Collection::ReminderLedger, vec![row(&["chat/77", "2023-01-01", "1"])])
            .await;
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let report = controller
            .run_reminders(reminders("2024-01-01", &["chat/77"]))
            .await
            .unwrap();
        assert_eq!(report.decisions[0].skip_reason(), Some(SkipReason::Blacklisted));
        assert!(delivery.sent().is_empty());
        assert_eq!(
            store.rows(Collection::ReminderLedger).await,
            vec![row(&["chat/77", "2023-01-01", "1"])]
        );
    }

    #[tokio::test]
    async fn profile_entry_does_not_veto_chat_with_same_number() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(Collection::Blacklist, vec![row(&["42"])]).await;
        let delivery = Arc::new(StubDelivery::ok());
        let resolver = StubResolver::default().with_profile("https://x.org/berichten/42", "9001");
        let controller = CadenceController::new(store.clone(), delivery.clone(), Arc::new(resolver))
            .with_pacing(SendPacing::none());

        let report = controller
            .run_reminders(reminders("2024-01-01", &["https://x.org/berichten/42"]))
            .await
            .unwrap();
        assert_eq!(report.decisions[0].action, Action::Send { kind: SendKind::Initial });
        assert_eq!(delivery.sent().len(), 1);
    }

    #[tokio::test]
    async fn malformed_ledger_row_is_skipped_and_kept() {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .seed(
                Collection::ReminderLedger,
                vec![
                    row(&["b", "2024-01-01", "2"]),
                    row(&["broken", "not-a-date", "1"]),
                    row(&["c", "2024-01-01", "1"]),
                ],
            )
            .await;
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let report = controller
            .run_reminders(reminders("2024-01-10", &["a", "b"]))
            .await
            .unwrap();

        assert_eq!(report.sent(), 2);
        assert_eq!(delivery.sent().len(), 2);
        assert_eq!(store.put_count(Collection::ReminderLedger).await, 1);
        assert_eq!(
            store.rows(Collection::ReminderLedger).await,
            vec![
                row(&["a", "2024-01-10", "0"]),
                row(&["b", "2024-01-10", "3"]),
                row(&["c", "2024-01-01", "1"]),
                row(&["broken", "not-a-date", "1"]),
            ]
        );
    }

    #[tokio::test]
    async fn mixed_batch_writes_ledger_once() {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .seed(
                Collection::ReminderLedger,
                vec![
                    row(&["b", "2024-01-01", "2"]),
                    row(&["c", "2024-01-01", "4"]),
                    row(&["d", "2023-01-01", "4"]),
                ],
            )
            .await;
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let report = controller
            .run_reminders(reminders("2024-06-01", &["a", "b", "c", "d"]))
            .await
            .unwrap();

        let kinds: Vec<Action> = report.decisions.iter().map(|d| d.action).collect();
        assert_eq!(
            kinds,
            vec![
                Action::Send { kind: SendKind::Initial },
                Action::Send { kind: SendKind::Reminder },
                Action::Skip { reason: SkipReason::BanActive },
                Action::Send { kind: SendKind::NewCycle },
            ]
        );
        assert_eq!(delivery.sent().len(), 3);
        assert_eq!(delivery.sent()[0].1, "Hi there, Sam here");
        assert_eq!(store.put_count(Collection::ReminderLedger).await, 1);
        assert_eq!(report.persisted, vec![Collection::ReminderLedger]);
        assert_eq!(
            store.rows(Collection::ReminderLedger).await,
            vec![
                row(&["a", "2024-06-01", "0"]),
                row(&["b", "2024-06-01", "3"]),
                row(&["c", "2024-01-01", "4"]),
                row(&["d", "2024-06-01", "0"]),
                row(&["d", "2024-06-01", "5"]),
            ]
        );
    }

    #[tokio::test]
    async fn second_identical_run_is_all_skip() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let first = controller.run_reminders(reminders("2024-01-10", &["a", "b"])).await.unwrap();
        assert_eq!(first.sent(), 2);
        let rows = store.rows(Collection::ReminderLedger).await;

        let second = controller.run_reminders(reminders("2024-01-10", &["a", "b"])).await.unwrap();
        assert_eq!(second.sent(), 0);
        assert!(second
            .decisions
            .iter()
            .all(|d| d.skip_reason() == Some(SkipReason::TooSoon)));
        assert_eq!(store.rows(Collection::ReminderLedger).await, rows);
        assert_eq!(store.put_count(Collection::ReminderLedger).await, 1);
        assert_eq!(delivery.sent().len(), 2);
    }

    #[tokio::test]
    async fn unresolved_subject_skipped_batch_continues() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) = controller_with(store.clone(), StubDelivery::ok());

        let report = controller
            .run_reminders(reminders("2024-01-01", &["bad/1", "ok/2"]))
            .await
            .unwrap();
        assert_eq!(report.decisions[0].skip_reason(), Some(SkipReason::Unresolved));
        assert!(report.decisions[1].is_send());
        assert_eq!(store.rows(Collection::ReminderLedger).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_advances_by_default() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) =
            controller_with(store.clone(), StubDelivery::failing_all());

        let report = controller.run_reminders(reminders("2024-01-01", &["a"])).await.unwrap();
        assert_eq!(report.decisions[0].delivered, Some(false));
        assert_eq!(report.decisions[0].new_escalation_count, Some(0));
        assert_eq!(
            store.rows(Collection::ReminderLedger).await,
            vec![row(&["a", "2024-01-01", "0"])]
        );
    }

    #[tokio::test]
    async fn failed_delivery_held_under_hold_policy() {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .seed(Collection::ReminderLedger, vec![row(&["a", "2024-01-01", "1"])])
            .await;
        let (controller, _delivery) =
            controller_with(store.clone(), StubDelivery::failing_for(&["a"]));
        let controller = controller.with_failure_policy(DeliveryFailurePolicy::Hold);

        let report = controller
            .run_reminders(reminders("2024-01-10", &["a", "b"]))
            .await
            .unwrap();
        assert_eq!(report.decisions[0].delivered, Some(false));
        assert_eq!(report.decisions[0].new_escalation_count, Some(1));
        assert_eq!(report.decisions[1].delivered, Some(true));
        assert_eq!(
            store.rows(Collection::ReminderLedger).await,
            vec![row(&["a", "2024-01-01", "1"]), row(&["b", "2024-01-10", "0"])]
        );
    }

    #[tokio::test]
    async fn store_unavailable_aborts_without_write() {
        let store = Arc::new(MemoryRecordStore::new());
        store.fail_on(Collection::ReminderLedger, StoreOp::Put).await;
        let (controller, _delivery) = controller_with(store.clone(), StubDelivery::ok());
        let mut events = controller.subscribe();

        let err = controller
            .run_reminders(reminders("2024-01-01", &["a"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::Store(StoreError::Unavailable { collection: "reminder_ledger", .. })
        ));
        assert!(store.rows(Collection::ReminderLedger).await.is_empty());

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, BatchEvent::Failed { .. });
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn unreadable_ledger_aborts_before_any_send() {
        let store = Arc::new(MemoryRecordStore::new());
        store.fail_on(Collection::ReminderLedger, StoreOp::Get).await;
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        assert!(controller.run_reminders(reminders("2024-01-01", &["a"])).await.is_err());
        assert!(delivery.sent().is_empty());
    }

    #[tokio::test]
    async fn stop_flag_keeps_committed_work() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());
        let stop = StopSignal::new();
        stop.stop();

        let permit = controller.reserve(BatchKind::Reminders).unwrap();
        let report = controller
            .execute_reminders(permit, reminders("2024-01-01", &["a", "b"]), &stop)
            .await
            .unwrap();
        assert!(report.stopped);
        assert!(report.decisions.is_empty());
        assert!(delivery.sent().is_empty());
        assert_eq!(store.put_count(Collection::ReminderLedger).await, 0);
    }

    #[tokio::test]
    async fn overlapping_reminder_batch_rejected() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) = controller_with(store, StubDelivery::ok());

        let permit = controller.reserve(BatchKind::Reminders).unwrap();
        let err = controller
            .run_reminders(reminders("2024-01-01", &["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InFlight { .. }));
        assert!(matches!(
            controller.blacklist_add("x").await,
            Err(BlacklistError::InFlight { .. })
        ));

        drop(permit);
        assert!(controller.run_reminders(reminders("2024-01-01", &["a"])).await.is_ok());
    }

    #[tokio::test]
    async fn threads_feed_candidates_after_explicit_ones() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let threads = vec![
            ChatThread {
                subject: "t/1".into(),
                counterpart_name: Some("Anna".into()),
                messages: vec![ThreadMessage {
                    author: "Sam".into(),
                    sent_on: d("2024-01-01"),
                }],
            },
            ChatThread {
                subject: "a".into(),
                counterpart_name: None,
                messages: vec![ThreadMessage {
                    author: "Sam".into(),
                    sent_on: d("2024-01-01"),
                }],
            },
        ];
        let batch = reminders("2024-01-10", &["a"]).with_threads(threads, vec!["Anna".into()]);
        let report = controller.run_reminders(batch).await.unwrap();

        let subjects: Vec<&str> = report.decisions.iter().map(|d| d.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a", "t/1"]);
        assert_eq!(delivery.sent()[1].1, "Hi Anna, Sam here");
    }

    #[tokio::test]
    async fn zero_cadence_rejected_before_processing() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());
        let batch = ReminderBatch::new(d("2024-01-01"))
            .with_candidates(candidates(&["a"]))
            .with_cadence_days(0);
        assert!(matches!(
            controller.run_reminders(batch).await,
            Err(BatchError::InvalidCadence(0))
        ));
        assert!(delivery.sent().is_empty());
    }

    #[tokio::test]
    async fn events_stream_each_decision() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) = controller_with(store, StubDelivery::ok());
        let mut events = controller.subscribe();

        let report = controller.run_reminders(reminders("2024-01-01", &["a", "b"])).await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.batch_id(), report.batch_id);
            received.push(event);
        }
        assert_eq!(received.len(), 4);
        assert!(matches!(received[0], BatchEvent::Started { .. }));
        assert!(matches!(received[3], BatchEvent::Finished { .. }));
    }

    // ── Outreach ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn outreach_respects_guards_and_records_contacts() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(Collection::Blacklist, vec![row(&["blocked"])]).await;
        store
            .seed(
                Collection::ContactThrottle,
                vec![
                    row(&["recent", "2024-01-01"]),
                    row(&["old", "2023-01-01"]),
                    row(&["banned", "2023-01-01"]),
                ],
            )
            .await;
        store
            .seed(
                Collection::ReminderLedger,
                vec![ReminderRecord::new("banned", d("2024-01-01"), 5).to_row()],
            )
            .await;
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());

        let batch = OutreachBatch::new(d("2024-03-01"), "Hello {name}").with_recipients(
            candidates(&["blocked", "recent", "old", "banned", "new"]),
        );
        let report = controller.run_outreach(batch).await.unwrap();

        let reasons: Vec<Option<SkipReason>> =
            report.decisions.iter().map(|d| d.skip_reason()).collect();
        assert_eq!(
            reasons,
            vec![
                Some(SkipReason::Blacklisted),
                Some(SkipReason::RecentlyContacted),
                None,
                Some(SkipReason::Banned),
                None,
            ]
        );
        assert_eq!(delivery.sent().len(), 2);
        assert_eq!(store.put_count(Collection::ContactThrottle).await, 1);
        assert_eq!(
            store.rows(Collection::ContactThrottle).await,
            vec![
                row(&["banned", "2023-01-01"]),
                row(&["new", "2024-03-01"]),
                row(&["old", "2024-03-01"]),
                row(&["recent", "2024-01-01"]),
            ]
        );
    }

    #[tokio::test]
    async fn outreach_failure_does_not_record_contact() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) =
            controller_with(store.clone(), StubDelivery::failing_for(&["a"]));
        let batch = OutreachBatch::new(d("2024-03-01"), "Hello")
            .with_recipients(candidates(&["a", "b", "a"]));

        let report = controller.run_outreach(batch).await.unwrap();
        assert_eq!(report.decisions.len(), 2);
        assert_eq!(report.decisions[0].delivered, Some(false));
        assert_eq!(
            store.rows(Collection::ContactThrottle).await,
            vec![row(&["b", "2024-03-01"])]
        );
    }

    #[tokio::test]
    async fn blacklist_mutations_through_controller() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) = controller_with(store, StubDelivery::ok());

        assert_eq!(controller.blacklist_add("42").await.unwrap(), BlacklistChange::Added);
        assert_eq!(
            controller.blacklist_add("42").await.unwrap(),
            BlacklistChange::AlreadyPresent
        );
        assert_eq!(controller.blacklist_list().await.unwrap(), vec!["42"]);
        assert_eq!(controller.blacklist_remove("42").await.unwrap(), BlacklistChange::Removed);
        assert!(controller.blacklist_list().await.unwrap().is_empty());
    }
}
