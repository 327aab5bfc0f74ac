use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, CreateAppointmentRequest, UpdateAppointmentRequest};
use appointment_cell::{AppointmentBookingService, EventTypeResolver};
use notification_cell::NotificationQueueService;
use shared_config::SchedulingSettings;
use shared_database::{AppointmentStore, DataStore, DirectoryStore, InMemoryStore, NotificationStore};
use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::directory::{LeadStatus, Patient};
use shared_models::notification::{NotificationKind, NotificationStatus};
use shared_utils::test_utils::{event_type_fixture, lead_fixture, patient_fixture};

struct Harness {
    store: Arc<InMemoryStore>,
    booking: Arc<AppointmentBookingService>,
    clinic_id: Uuid,
    doctor_id: Uuid,
    patient: Patient,
    now: DateTime<Utc>,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let data = DataStore::in_memory(store.clone());
    let settings = SchedulingSettings::default();
    let resolver = Arc::new(EventTypeResolver::new(data.event_types.clone(), &settings));
    let queue = Arc::new(NotificationQueueService::new(&data));
    let booking = Arc::new(AppointmentBookingService::new(&data, resolver, queue, settings));

    let clinic_id = Uuid::new_v4();
    let patient = patient_fixture(clinic_id, Some("+55 11 99999-0000"));
    store.seed_patient(patient.clone()).await;

    Harness {
        store,
        booking,
        clinic_id,
        doctor_id: Uuid::new_v4(),
        patient,
        now: Utc.with_ymd_and_hms(2027, 3, 1, 12, 0, 0).unwrap(),
    }
}

/// 2027-03-10 at the given UTC time.
fn on_the_10th(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2027, 3, 10, hour, minute, 0).unwrap()
}

impl Harness {
    fn request(&self, start: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            clinic_id: Some(self.clinic_id),
            doctor_id: Some(self.doctor_id),
            patient_id: Some(self.patient.id),
            start_time: Some(start),
            ..Default::default()
        }
    }

    async fn book(&self, start: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        self.booking
            .create(self.request(start), self.now)
            .await
            .map(|outcome| outcome.into_primary())
    }

    async fn live(&self, appointment_id: Uuid) -> Vec<(NotificationKind, NotificationStatus, DateTime<Utc>)> {
        self.store
            .list_for_appointment(appointment_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.status != NotificationStatus::Cancelled)
            .map(|e| (e.kind, e.status, e.scheduled_for))
            .collect()
    }
}

#[tokio::test]
async fn overlapping_booking_is_rejected_but_touching_one_is_accepted() {
    let h = harness().await;
    let first = h.book(on_the_10th(12, 0)).await.unwrap();
    assert_eq!(first.end_time, on_the_10th(12, 30));
    assert_eq!(first.status, AppointmentStatus::Scheduled);
    assert_eq!(first.title, "Consulta");

    let clash = h.book(on_the_10th(12, 15)).await;
    assert_matches!(clash, Err(AppointmentError::Conflict(ref windows)) if windows.len() == 1 && windows[0].appointment_id == first.id);

    let back_to_back = h.book(on_the_10th(12, 30)).await.unwrap();
    assert_eq!(back_to_back.start_time, first.end_time);
}

#[tokio::test]
async fn long_running_appointment_that_started_earlier_still_conflicts() {
    let h = harness().await;
    let mut request = h.request(on_the_10th(8, 0));
    request.duration_minutes = Some(240);
    h.booking.create(request, h.now).await.unwrap();

    let result = h.book(on_the_10th(11, 30)).await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));
}

#[tokio::test]
async fn event_type_duration_beats_requested_duration() {
    let h = harness().await;
    let retorno = event_type_fixture(h.clinic_id, "Retorno", 15);
    h.store.seed_event_type(retorno.clone()).await;

    let mut request = h.request(on_the_10th(14, 0));
    request.event_type_id = Some(retorno.id);
    request.duration_minutes = Some(60);

    let appointment = h.booking.create(request, h.now).await.unwrap().into_primary();
    assert_eq!(appointment.duration_minutes, 15);
    assert_eq!(appointment.end_time, on_the_10th(14, 15));
    assert_eq!(appointment.title, "Retorno");
    assert_eq!(appointment.event_type_id, Some(retorno.id));
}

#[tokio::test]
async fn missing_identity_fields_are_a_validation_error() {
    let h = harness().await;
    let mut request = h.request(on_the_10th(9, 0));
    request.patient_id = None;
    request.start_time = None;

    let result = h.booking.create(request, h.now).await;
    assert_matches!(result, Err(AppointmentError::ValidationError(ref msg)) if msg.contains("patient_id") && msg.contains("start_time"));
    assert!(h.store.list_upcoming(h.clinic_id, h.now, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn booking_queues_confirmation_and_reminder() {
    let h = harness().await;
    let outcome = h.booking.create(h.request(on_the_10th(12, 0)), h.now).await.unwrap();
    assert!(outcome.advisories.is_empty());

    let mut live = h.live(outcome.primary.id).await;
    live.sort_by_key(|(kind, _, _)| kind.as_str());
    assert_eq!(
        live,
        vec![
            (NotificationKind::ConfirmationOnCreate, NotificationStatus::Pending, h.now),
            (NotificationKind::Reminder24h, NotificationStatus::Pending, on_the_10th(12, 0) - Duration::hours(24)),
        ]
    );
}

#[tokio::test]
async fn side_effect_failures_do_not_fail_the_booking() {
    let h = harness().await;
    let silent = patient_fixture(h.clinic_id, None);
    h.store.seed_patient(silent.clone()).await;

    let mut request = h.request(on_the_10th(12, 0));
    request.patient_id = Some(silent.id);
    let outcome = h.booking.create(request, h.now).await.unwrap();

    assert_eq!(outcome.advisories.len(), 2);
    assert!(outcome.advisories.iter().all(|a| a.operation.starts_with("enqueue_")));
    assert!(h.store.get(outcome.primary.id).await.unwrap().is_some());
}

#[tokio::test]
async fn lead_is_promoted_by_metadata_id_then_by_phone() {
    let h = harness().await;
    let explicit = lead_fixture(h.clinic_id, "5511900000000");
    let by_phone = lead_fixture(h.clinic_id, "(11) 99999-0000");
    h.store.seed_lead(explicit.clone()).await;
    h.store.seed_lead(by_phone.clone()).await;

    let mut request = h.request(on_the_10th(12, 0));
    request.metadata.insert("lead_id".to_string(), json!(explicit.id.to_string()));
    let first = h.booking.create(request, h.now).await.unwrap().into_primary();

    let promoted = h.store.find_lead(h.clinic_id, explicit.id).await.unwrap().unwrap();
    assert_eq!(promoted.status, LeadStatus::Scheduled);
    assert_eq!(promoted.appointment_id, Some(first.id));
    let untouched = h.store.find_lead(h.clinic_id, by_phone.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, LeadStatus::New);

    // Same number as the patient, formatted differently.
    let mut phone_lead = lead_fixture(h.clinic_id, "+55 (11) 99999-0000");
    phone_lead.id = by_phone.id;
    h.store.seed_lead(phone_lead).await;
    let second = h.book(on_the_10th(13, 0)).await.unwrap();
    let promoted = h.store.find_lead(h.clinic_id, by_phone.id).await.unwrap().unwrap();
    assert_eq!(promoted.status, LeadStatus::Scheduled);
    assert_eq!(promoted.appointment_id, Some(second.id));
}

#[tokio::test]
async fn reschedule_onto_another_appointment_is_rejected_and_leaves_the_record() {
    let h = harness().await;
    let morning = h.book(on_the_10th(12, 0)).await.unwrap();
    let noon = h.book(on_the_10th(15, 0)).await.unwrap();

    let result = h
        .booking
        .update(
            noon.id,
            UpdateAppointmentRequest {
                start_time: Some(on_the_10th(12, 10)),
                ..Default::default()
            },
            h.now,
        )
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(ref windows)) if windows[0].appointment_id == morning.id);

    let stored = h.store.get(noon.id).await.unwrap().unwrap();
    assert_eq!(stored, noon);
}

#[tokio::test]
async fn reschedule_excludes_own_window_and_moves_the_reminder() {
    let h = harness().await;
    let appointment = h.book(on_the_10th(12, 0)).await.unwrap();

    let moved = h
        .booking
        .update(
            appointment.id,
            UpdateAppointmentRequest {
                start_time: Some(on_the_10th(12, 15)),
                ..Default::default()
            },
            h.now,
        )
        .await
        .unwrap();
    assert!(moved.advisories.is_empty());
    assert_eq!(moved.primary.end_time, on_the_10th(12, 45));

    let reminders: Vec<_> = h
        .store
        .list_for_appointment(appointment.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == NotificationKind::Reminder24h)
        .map(|e| (e.status, e.scheduled_for))
        .collect();
    assert_eq!(reminders.len(), 2);
    assert!(reminders.contains(&(NotificationStatus::Cancelled, on_the_10th(12, 0) - Duration::hours(24))));
    assert!(reminders.contains(&(NotificationStatus::Pending, on_the_10th(12, 15) - Duration::hours(24))));
}

#[tokio::test]
async fn cancelling_clears_pending_notifications_and_frees_the_slot() {
    let h = harness().await;
    let appointment = h.book(on_the_10th(12, 0)).await.unwrap();
    let before = h.store.notification_count().await;

    let cancelled = h
        .booking
        .update(
            appointment.id,
            UpdateAppointmentRequest {
                status: Some(AppointmentStatus::Cancelled),
                ..Default::default()
            },
            h.now,
        )
        .await
        .unwrap();
    assert_eq!(cancelled.primary.status, AppointmentStatus::Cancelled);
    assert!(h.live(appointment.id).await.is_empty());
    assert_eq!(h.store.notification_count().await, before);

    let replacement = h.book(on_the_10th(12, 0)).await;
    assert!(replacement.is_ok());

    // Reactivating the cancelled one would now double-book.
    let revived = h
        .booking
        .update(
            appointment.id,
            UpdateAppointmentRequest {
                status: Some(AppointmentStatus::Scheduled),
                ..Default::default()
            },
            h.now,
        )
        .await;
    assert_matches!(revived, Err(AppointmentError::Conflict(_)));
}

#[tokio::test]
async fn reactivating_a_cancelled_appointment_requeues_its_notifications() {
    let h = harness().await;
    let appointment = h.book(on_the_10th(12, 0)).await.unwrap();
    let status_update = |status| UpdateAppointmentRequest {
        status: Some(status),
        ..Default::default()
    };

    h.booking
        .update(appointment.id, status_update(AppointmentStatus::Cancelled), h.now)
        .await
        .unwrap();
    assert!(h.live(appointment.id).await.is_empty());

    let revived = h
        .booking
        .update(appointment.id, status_update(AppointmentStatus::Scheduled), h.now)
        .await
        .unwrap();
    assert!(revived.advisories.is_empty());

    let live = h.live(appointment.id).await;
    assert_eq!(live.len(), 2);
    assert!(live.contains(&(NotificationKind::ConfirmationOnCreate, NotificationStatus::Pending, h.now)));
    assert!(live.contains(&(
        NotificationKind::Reminder24h,
        NotificationStatus::Pending,
        on_the_10th(12, 0) - Duration::hours(24)
    )));
}

#[tokio::test]
async fn duration_over_the_maximum_is_rejected_before_booking() {
    let h = harness().await;
    let mut request = h.request(on_the_9th_evening());
    request.duration_minutes = Some(720);

    let result = h.booking.create(request, h.now).await;
    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    assert!(h.store.list_upcoming(h.clinic_id, h.now, None).await.unwrap().is_empty());
}

/// 22:00 in São Paulo on the 9th.
fn on_the_9th_evening() -> DateTime<Utc> {
    on_the_10th(1, 0)
}

#[tokio::test]
async fn metadata_patch_is_shallow_merged_and_stamped() {
    let h = harness().await;
    let mut request = h.request(on_the_10th(12, 0));
    request.metadata.insert("channel".to_string(), json!("whatsapp"));
    request.metadata.insert("notes".to_string(), json!("primeira consulta"));
    let appointment = h.booking.create(request, h.now).await.unwrap().into_primary();

    let mut patch = Map::new();
    patch.insert("notes".to_string(), json!("trazer exames"));
    let later = h.now + Duration::hours(1);
    let updated = h
        .booking
        .update(
            appointment.id,
            UpdateAppointmentRequest {
                metadata: Some(patch),
                ..Default::default()
            },
            later,
        )
        .await
        .unwrap()
        .into_primary();

    assert_eq!(updated.metadata["channel"], json!("whatsapp"));
    assert_eq!(updated.metadata["notes"], json!("trazer exames"));
    assert_eq!(updated.metadata["last_updated_at"], Value::String(later.to_rfc3339()));
    assert_eq!(updated.start_time, appointment.start_time);
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let h = harness().await;
    let id = Uuid::new_v4();
    let result = h
        .booking
        .update(id, UpdateAppointmentRequest::default(), h.now)
        .await;
    assert_matches!(result, Err(AppointmentError::NotFound(missing)) if missing == id);
}

#[tokio::test]
async fn concurrent_duplicate_bookings_admit_exactly_one() {
    let h = harness().await;
    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let booking = h.booking.clone();
        let request = h.request(on_the_10th(16, 0));
        let now = h.now;
        tasks.spawn(async move { booking.create(request, now).await });
    }

    let mut booked = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => booked += 1,
            Err(e) => assert_matches!(e, AppointmentError::Conflict(_) | AppointmentError::SlotTaken),
        }
    }
    assert_eq!(booked, 1);
}
