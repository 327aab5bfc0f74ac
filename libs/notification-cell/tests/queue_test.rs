use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use uuid::Uuid;

use notification_cell::{NotificationError, NotificationQueueService};
use shared_database::{AppointmentStore, DataStore, InMemoryStore, NotificationStore};
use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::notification::{NotificationKind, NotificationStatus, UpsertOutcome};
use shared_utils::test_utils::{appointment_fixture, patient_fixture};

struct Harness {
    store: Arc<InMemoryStore>,
    queue: NotificationQueueService,
    clinic_id: Uuid,
    doctor_id: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let queue = NotificationQueueService::new(&DataStore::in_memory(store.clone()));
    Harness {
        store,
        queue,
        clinic_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
    }
}

impl Harness {
    async fn book(&self, hours_ahead: i64, phone: Option<&str>) -> Appointment {
        let patient = patient_fixture(self.clinic_id, phone);
        self.store.seed_patient(patient.clone()).await;
        let appointment = appointment_fixture(
            self.clinic_id,
            self.doctor_id,
            patient.id,
            Utc::now() + Duration::hours(hours_ahead),
            30,
        );
        self.store.insert(&appointment).await.unwrap()
    }

    async fn live_entries(&self, appointment_id: Uuid) -> Vec<(NotificationKind, NotificationStatus)> {
        let mut entries: Vec<_> = self
            .store
            .list_for_appointment(appointment_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.status != NotificationStatus::Cancelled)
            .map(|e| (e.kind, e.status))
            .collect();
        entries.sort_by_key(|(kind, _)| kind.as_str());
        entries
    }
}

#[tokio::test]
async fn repeated_enqueue_keeps_one_live_entry() {
    let h = harness();
    let appointment = h.book(48, Some("+55 (11) 99999-0000")).await;
    let now = Utc::now();

    let first = h
        .queue
        .enqueue(&appointment, NotificationKind::Reminder24h, now)
        .await
        .unwrap();
    assert_matches!(first, Some(UpsertOutcome::Inserted(_)));

    for _ in 0..3 {
        let again = h
            .queue
            .enqueue(&appointment, NotificationKind::Reminder24h, now)
            .await
            .unwrap();
        assert_matches!(again, Some(UpsertOutcome::Refreshed(_)));
    }

    let entries = h.store.list_for_appointment(appointment.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload.to, "5511999990000");
    assert_eq!(entries[0].scheduled_for, appointment.start_time - Duration::hours(24));
}

#[tokio::test]
async fn reminder_inside_the_last_day_is_not_queued() {
    let h = harness();
    let appointment = h.book(10, Some("5511999990000")).await;

    let outcome = h
        .queue
        .enqueue(&appointment, NotificationKind::Reminder24h, Utc::now())
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(h.store.notification_count().await, 0);
}

#[tokio::test]
async fn missing_phone_is_reported() {
    let h = harness();
    let appointment = h.book(48, None).await;

    let result = h
        .queue
        .enqueue(&appointment, NotificationKind::ConfirmationOnCreate, Utc::now())
        .await;

    assert_matches!(result, Err(NotificationError::MissingRecipient(_)));
    assert_eq!(h.store.notification_count().await, 0);
}

#[tokio::test]
async fn cancel_pending_cancels_everything_and_is_idempotent() {
    let h = harness();
    let appointment = h.book(48, Some("5511999990000")).await;
    let now = Utc::now();
    for kind in NotificationKind::ALL {
        h.queue.enqueue(&appointment, kind, now).await.unwrap();
    }

    let cancelled = h.queue.cancel_pending(appointment.id, now).await.unwrap();
    assert_eq!(cancelled.len(), 2);
    assert!(h.live_entries(appointment.id).await.is_empty());

    let again = h.queue.cancel_pending(appointment.id, now).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(h.store.notification_count().await, 2);
}

#[tokio::test]
async fn reschedule_reminder_replaces_the_pending_entry() {
    let h = harness();
    let mut appointment = h.book(48, Some("5511999990000")).await;
    let now = Utc::now();
    h.queue
        .enqueue(&appointment, NotificationKind::Reminder24h, now)
        .await
        .unwrap();

    appointment.start_time = appointment.start_time + Duration::hours(24);
    appointment.end_time = appointment.start_time + Duration::minutes(30);

    let outcome = h.queue.reschedule_reminder(&appointment, now).await.unwrap();
    let fresh = outcome.expect("reminder should be queued");
    assert_matches!(fresh, UpsertOutcome::Inserted(_));
    assert_eq!(fresh.entry().scheduled_for, appointment.start_time - Duration::hours(24));

    let history = h.store.list_for_appointment(appointment.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history
            .iter()
            .filter(|e| e.status == NotificationStatus::Cancelled)
            .count(),
        1
    );
}

#[tokio::test]
async fn rebuild_is_idempotent_and_counts_failures() {
    let h = harness();
    let far = h.book(72, Some("5511999990001")).await;
    let near = h.book(5, Some("5511999990002")).await;
    let no_phone = h.book(96, None).await;

    let mut cancelled = h.book(120, Some("5511999990003")).await;
    cancelled.status = AppointmentStatus::Cancelled;
    h.store.update(&cancelled).await.unwrap();

    let now = Utc::now();
    let first = h.queue.rebuild(h.clinic_id, None, None, now).await.unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.errors, 1);

    let snapshot = (h.live_entries(far.id).await, h.live_entries(near.id).await);

    let second = h.queue.rebuild(h.clinic_id, None, None, now).await.unwrap();
    assert_eq!(second, first);
    assert_eq!((h.live_entries(far.id).await, h.live_entries(near.id).await), snapshot);

    assert_eq!(snapshot.0.len(), 2);
    // Too close for a reminder: confirmation only.
    assert_eq!(
        snapshot.1,
        vec![(NotificationKind::ConfirmationOnCreate, NotificationStatus::Pending)]
    );
    assert!(h.live_entries(no_phone.id).await.is_empty());
    assert!(h.live_entries(cancelled.id).await.is_empty());
}

#[tokio::test]
async fn rebuild_rejects_inverted_range() {
    let h = harness();
    let now = Utc::now();

    let result = h
        .queue
        .rebuild(h.clinic_id, Some(now + Duration::days(2)), Some(now + Duration::days(1)), now)
        .await;

    assert_matches!(result, Err(NotificationError::ValidationError(_)));
}
