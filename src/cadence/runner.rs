//! Background batch execution with a cooperative stop flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::controller::{CadenceController, OutreachBatch, ReminderBatch};
use super::report::{BatchKind, BatchReport};
use crate::error::BatchError;

/// Checked between subjects, never mid-subject.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A batch running on its own task.
pub struct BatchHandle {
    pub batch_id: uuid::Uuid,
    pub kind: BatchKind,
    pub stop: StopSignal,
    pub handle: JoinHandle<Result<BatchReport, BatchError>>,
}

/// Claim the reminder collections now, then run the batch in the background.
///
/// The claim happens before spawning so an overlapping request is rejected
/// synchronously.
pub fn spawn_reminder_batch(
    controller: Arc<CadenceController>,
    batch: ReminderBatch,
) -> Result<BatchHandle, BatchError> {
    let permit = controller.reserve(BatchKind::Reminders)?;
    let batch_id = permit.id();
    let stop = StopSignal::new();
    let stop_flag = stop.clone();

    let handle = tokio::spawn(async move {
        info!(batch_id = %batch_id, "Reminder batch started in background");
        let result = controller.execute_reminders(permit, batch, &stop_flag).await;
        if let Err(e) = &result {
            error!(batch_id = %batch_id, error = %e, "Reminder batch failed");
        }
        result
    });

    Ok(BatchHandle {
        batch_id,
        kind: BatchKind::Reminders,
        stop,
        handle,
    })
}

/// Same as [`spawn_reminder_batch`] for first-contact outreach.
pub fn spawn_outreach_batch(
    controller: Arc<CadenceController>,
    batch: OutreachBatch,
) -> Result<BatchHandle, BatchError> {
    let permit = controller.reserve(BatchKind::Outreach)?;
    let batch_id = permit.id();
    let stop = StopSignal::new();
    let stop_flag = stop.clone();

    let handle = tokio::spawn(async move {
        info!(batch_id = %batch_id, "Outreach batch started in background");
        let result = controller.execute_outreach(permit, batch, &stop_flag).await;
        if let Err(e) = &result {
            error!(batch_id = %batch_id, error = %e, "Outreach batch failed");
        }
        result
    });

    Ok(BatchHandle {
        batch_id,
        kind: BatchKind::Outreach,
        stop,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::controller::test_support::{StubDelivery, controller_with};
    use crate::cadence::model::{Candidate, DATE_FORMAT};
    use crate::store::MemoryRecordStore;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::parse_from_str("2024-03-01", DATE_FORMAT).unwrap()
    }

    #[test]
    fn stop_signal_is_shared() {
        let stop = StopSignal::new();
        let clone = stop.clone();
        assert!(!clone.is_stopped());
        stop.stop();
        assert!(clone.is_stopped());
    }

    #[tokio::test]
    async fn background_batch_completes() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, delivery) = controller_with(store.clone(), StubDelivery::ok());
        let controller = Arc::new(controller);

        let batch = ReminderBatch::new(today()).with_candidates(vec![Candidate::new("a")]);
        let running = spawn_reminder_batch(controller, batch).unwrap();
        let report = running.handle.await.unwrap().unwrap();

        assert_eq!(report.batch_id, running.batch_id);
        assert_eq!(report.sent(), 1);
        assert_eq!(delivery.sent().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_spawn_rejected() {
        let store = Arc::new(MemoryRecordStore::new());
        let (controller, _delivery) = controller_with(store, StubDelivery::ok());
        let controller = Arc::new(controller);

        let _held = controller.reserve(BatchKind::Reminders).unwrap();
        let err = spawn_reminder_batch(controller.clone(), ReminderBatch::new(today()))
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::InFlight { .. }));

        let err = spawn_outreach_batch(controller, OutreachBatch::new(today(), "hi"))
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::InFlight { collection: "blacklist" }));
    }
}
