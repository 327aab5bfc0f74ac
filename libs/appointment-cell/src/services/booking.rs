// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use notification_cell::NotificationQueueService;
use shared_config::SchedulingSettings;
use shared_database::{AppointmentStore, DataStore};
use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::notification::NotificationKind;
use shared_models::outcome::Outcome;

use crate::models::{
    AppointmentError, ConflictWindow, CreateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::conflict::{busy_query, conflicting, TimeWindow};
use crate::services::event_type::EventTypeResolver;
use crate::services::leads::LeadPromoter;

const DEFAULT_SOURCE: &str = "api";

/// Creates and mutates appointments. Every time-affecting write is checked
/// against the doctor's occupying appointments first; the store's overlap
/// constraint is the final word under concurrent writes.
pub struct AppointmentBookingService {
    appointments: Arc<dyn AppointmentStore>,
    resolver: Arc<EventTypeResolver>,
    queue: Arc<NotificationQueueService>,
    leads: LeadPromoter,
    settings: SchedulingSettings,
}

impl AppointmentBookingService {
    pub fn new(
        store: &DataStore,
        resolver: Arc<EventTypeResolver>,
        queue: Arc<NotificationQueueService>,
        settings: SchedulingSettings,
    ) -> Self {
        Self {
            appointments: store.appointments.clone(),
            resolver,
            queue,
            leads: LeadPromoter::new(store.directory.clone()),
            settings,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .get(id)
            .await?
            .ok_or(AppointmentError::NotFound(id))
    }

    #[instrument(skip(self, request))]
    pub async fn create(
        &self,
        request: CreateAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        let (clinic_id, doctor_id, patient_id, start_time) = match (
            request.clinic_id,
            request.doctor_id,
            request.patient_id,
            request.start_time,
        ) {
            (Some(clinic), Some(doctor), Some(patient), Some(start)) => (clinic, doctor, patient, start),
            _ => {
                let missing: Vec<&str> = [
                    ("clinic_id", request.clinic_id.is_none()),
                    ("doctor_id", request.doctor_id.is_none()),
                    ("patient_id", request.patient_id.is_none()),
                    ("start_time", request.start_time.is_none()),
                ]
                .into_iter()
                .filter_map(|(field, absent)| absent.then_some(field))
                .collect();
                return Err(AppointmentError::ValidationError(format!(
                    "Missing required fields: {}",
                    missing.join(", ")
                )));
            }
        };

        let resolved = self
            .resolver
            .resolve(clinic_id, request.event_type_id, request.duration_minutes)
            .await?;
        let window = TimeWindow::starting_at(start_time, resolved.minutes);

        self.ensure_free(clinic_id, doctor_id, &window, None).await?;

        let title = request
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(resolved.label);

        let appointment = Appointment {
            id: Uuid::new_v4(),
            clinic_id,
            doctor_id,
            patient_id,
            start_time: window.start,
            end_time: window.end,
            duration_minutes: resolved.minutes,
            status: AppointmentStatus::Scheduled,
            event_type_id: resolved.event_type_id,
            title,
            timezone: request
                .timezone
                .unwrap_or_else(|| self.settings.clinic_timezone.name().to_string()),
            metadata: request.metadata,
            source: request.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            created_at: now,
            updated_at: now,
        };

        let saved = self.appointments.insert(&appointment).await?;
        info!(
            "Appointment {} booked for doctor {} at {}",
            saved.id, saved.doctor_id, saved.start_time
        );

        let mut outcome = Outcome::new(saved);
        let promoted = self.leads.promote(&outcome.primary, now).await;
        outcome.absorb("lead_promotion", promoted);

        for kind in NotificationKind::ALL {
            let queued = self.queue.enqueue(&outcome.primary, kind, now).await;
            outcome.absorb(&format!("enqueue_{}", kind), queued);
        }

        Ok(outcome)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        let current = self.get(id).await?;
        let mut updated = current.clone();

        if let Some(status) = request.status {
            updated.status = status;
        }

        let reschedule = request.changes_time();
        if reschedule {
            let resolved = self
                .resolver
                .resolve(
                    updated.clinic_id,
                    request.event_type_id.or(updated.event_type_id),
                    request.duration_minutes.or(Some(updated.duration_minutes)),
                )
                .await?;
            let start = request.start_time.unwrap_or(updated.start_time);
            updated.start_time = start;
            updated.end_time = start + Duration::minutes(i64::from(resolved.minutes));
            updated.duration_minutes = resolved.minutes;
            if resolved.event_type_id.is_some() {
                updated.event_type_id = resolved.event_type_id;
                updated.title = resolved.label;
            }
        }

        if let Some(title) = request.title.filter(|title| !title.trim().is_empty()) {
            updated.title = title;
        }
        if let Some(timezone) = request.timezone {
            updated.timezone = timezone;
        }
        if let Some(patch) = request.metadata {
            updated.metadata.extend(patch);
            updated
                .metadata
                .insert("last_updated_at".to_string(), Value::String(now.to_rfc3339()));
        }
        updated.updated_at = now;

        // A reactivated appointment claims its slot again.
        let reoccupies = updated.is_occupying() && !current.is_occupying();
        if updated.is_occupying() && (reschedule || reoccupies) {
            self.ensure_free(
                updated.clinic_id,
                updated.doctor_id,
                &TimeWindow::of(&updated),
                Some(updated.id),
            )
            .await?;
        }

        let saved = self.appointments.update(&updated).await?;
        debug!("Appointment {} updated", saved.id);

        let mut outcome = Outcome::new(saved);

        if request.status.is_some_and(|status| status.is_cancellation()) {
            let cancelled = self.queue.cancel_pending(id, now).await;
            outcome.absorb("cancel_notifications", cancelled);
        } else if reoccupies {
            // Its entries were cancelled along with it.
            for kind in NotificationKind::ALL {
                let queued = self.queue.enqueue(&outcome.primary, kind, now).await;
                outcome.absorb(&format!("enqueue_{}", kind), queued);
            }
        } else if reschedule && outcome.primary.is_occupying() {
            let rescheduled = self.queue.reschedule_reminder(&outcome.primary, now).await;
            outcome.absorb("reschedule_reminder", rescheduled);
        }

        Ok(outcome)
    }

    async fn ensure_free(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        window: &TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        let query = busy_query(
            clinic_id,
            doctor_id,
            window,
            self.settings.max_appointment_minutes,
            exclude,
        );
        let busy = self.appointments.list_occupying(&query).await?;
        let conflicts: Vec<ConflictWindow> = conflicting(window, &busy)
            .into_iter()
            .map(ConflictWindow::from)
            .collect();

        if conflicts.is_empty() {
            return Ok(());
        }

        warn!(
            "Conflict detected for doctor {} - {} conflicting appointments",
            doctor_id,
            conflicts.len()
        );
        Err(AppointmentError::Conflict(conflicts))
    }
}
