// libs/notification-cell/src/services/queue.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::{AppointmentStore, DataStore, DirectoryStore, NotificationStore};
use shared_models::appointment::Appointment;
use shared_models::directory::normalize_phone;
use shared_models::notification::{
    DeliveryChannel, NewNotification, NotificationKind, NotificationPayload,
    NotificationQueueEntry, UpsertOutcome,
};

use crate::error::NotificationError;
use crate::models::RebuildSummary;

/// Producer side of the notification queue. Every write goes through the
/// store's idempotent upsert keyed by `(appointment_id, kind)`.
pub struct NotificationQueueService {
    notifications: Arc<dyn NotificationStore>,
    appointments: Arc<dyn AppointmentStore>,
    directory: Arc<dyn DirectoryStore>,
}

impl NotificationQueueService {
    pub fn new(store: &DataStore) -> Self {
        Self {
            notifications: store.notifications.clone(),
            appointments: store.appointments.clone(),
            directory: store.directory.clone(),
        }
    }

    /// Upserts the entry of `kind` for an appointment. Returns `Ok(None)` when
    /// nothing should be queued: the appointment no longer occupies its slot,
    /// or a reminder's send time has already passed.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn enqueue(
        &self,
        appointment: &Appointment,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<Option<UpsertOutcome>, NotificationError> {
        if !appointment.is_occupying() {
            debug!("Appointment is {}, not queueing {}", appointment.status, kind);
            return Ok(None);
        }

        let Some(scheduled_for) = kind.scheduled_for(appointment.start_time, now) else {
            debug!("Send window for {} already passed", kind);
            return Ok(None);
        };

        let patient = self
            .directory
            .get_patient(appointment.patient_id)
            .await?
            .ok_or(NotificationError::MissingRecipient(appointment.patient_id))?;

        let to = patient
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|digits| !digits.is_empty())
            .ok_or(NotificationError::MissingRecipient(patient.id))?;

        let notification = NewNotification {
            clinic_id: appointment.clinic_id,
            appointment_id: appointment.id,
            kind,
            channel: DeliveryChannel::Whatsapp,
            scheduled_for,
            payload: NotificationPayload {
                to,
                recipient_name: patient.name,
                appointment_start: appointment.start_time,
                timezone: appointment.timezone.clone(),
                title: appointment.title.clone(),
                text: None,
            },
        };

        let outcome = self.notifications.upsert_pending(&notification, now).await?;
        debug!("Queue entry {} for {}: {}", outcome.entry().id, kind, outcome_label(&outcome));
        Ok(Some(outcome))
    }

    pub async fn enqueue_by_id(
        &self,
        appointment_id: Uuid,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<Option<UpsertOutcome>, NotificationError> {
        let appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(NotificationError::AppointmentNotFound(appointment_id))?;
        self.enqueue(&appointment, kind, now).await
    }

    /// Cancels every pending entry of the appointment. No-op when none are pending.
    pub async fn cancel_pending(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationQueueEntry>, NotificationError> {
        let cancelled = self
            .notifications
            .cancel_pending(appointment_id, None, now)
            .await?;
        if !cancelled.is_empty() {
            info!("Cancelled {} pending notifications for appointment {}", cancelled.len(), appointment_id);
        }
        Ok(cancelled)
    }

    /// Cancel-then-recreate of the 24h reminder against the appointment's
    /// current start time.
    pub async fn reschedule_reminder(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<Option<UpsertOutcome>, NotificationError> {
        self.notifications
            .cancel_pending(appointment.id, Some(NotificationKind::Reminder24h), now)
            .await?;
        self.enqueue(appointment, NotificationKind::Reminder24h, now).await
    }

    /// Re-runs every standard enqueue for the clinic's future appointments.
    /// Per-appointment failures are counted, never fatal to the batch.
    #[instrument(skip(self))]
    pub async fn rebuild(
        &self,
        clinic_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RebuildSummary, NotificationError> {
        let from = from.map_or(now, |from| from.max(now));
        if let Some(to) = to {
            if to < from {
                return Err(NotificationError::ValidationError(
                    "`to` must not be before `from`".to_string(),
                ));
            }
        }

        let appointments = self.appointments.list_upcoming(clinic_id, from, to).await?;
        let mut summary = RebuildSummary::default();

        for appointment in &appointments {
            let mut failed = false;
            for kind in NotificationKind::ALL {
                if let Err(e) = self.enqueue(appointment, kind, now).await {
                    warn!("Rebuild of {} for appointment {} failed: {}", kind, appointment.id, e);
                    failed = true;
                }
            }
            if failed {
                summary.errors += 1;
            } else {
                summary.processed += 1;
            }
        }

        info!(
            "Rebuilt notification queue for clinic {}: {} processed, {} errors",
            clinic_id, summary.processed, summary.errors
        );
        Ok(summary)
    }

    pub async fn list_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<NotificationQueueEntry>, NotificationError> {
        Ok(self.notifications.list_for_appointment(appointment_id).await?)
    }
}

fn outcome_label(outcome: &UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Inserted(_) => "inserted",
        UpsertOutcome::Refreshed(_) => "refreshed",
        UpsertOutcome::Unchanged(_) => "unchanged",
    }
}
