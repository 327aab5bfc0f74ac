use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use shared_models::appointment::{Appointment, EventType};
use shared_models::connection::{ConnectionRecord, ConnectionStatus};
use shared_models::directory::{normalize_phone, Doctor, Lead, Patient};
use shared_models::notification::{
    FailureCode, FailureInfo, NewNotification, NotificationKind, NotificationQueueEntry,
    NotificationStatus, UpsertOutcome,
};

use crate::error::StoreError;
use crate::store::{
    AppointmentStore, BusyQuery, ConnectionStore, DirectoryStore, DueQuery, EventTypeStore,
    NotificationStore,
};

#[derive(Default)]
struct State {
    appointments: HashMap<Uuid, Appointment>,
    event_types: HashMap<Uuid, EventType>,
    notifications: Vec<NotificationQueueEntry>,
    connections: HashMap<Uuid, ConnectionRecord>,
    patients: HashMap<Uuid, Patient>,
    doctors: Vec<Doctor>,
    leads: HashMap<Uuid, Lead>,
}

impl State {
    /// Mirrors the exclusion constraint of the SQL schema.
    fn overlapping(&self, candidate: &Appointment) -> Option<&Appointment> {
        if !candidate.is_occupying() {
            return None;
        }
        self.appointments.values().find(|existing| {
            existing.id != candidate.id
                && existing.is_occupying()
                && existing.clinic_id == candidate.clinic_id
                && existing.doctor_id == candidate.doctor_id
                && existing.start_time < candidate.end_time
                && candidate.start_time < existing.end_time
        })
    }

    fn notification_mut(&mut self, id: Uuid) -> Result<&mut NotificationQueueEntry, StoreError> {
        self.notifications
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {}", id)))
    }
}

/// Process-local store enforcing the same invariants as the SQL schema. Every
/// check-and-write happens under a single lock.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_patient(&self, patient: Patient) {
        self.state.lock().await.patients.insert(patient.id, patient);
    }

    pub async fn seed_doctor(&self, doctor: Doctor) {
        self.state.lock().await.doctors.push(doctor);
    }

    pub async fn seed_event_type(&self, event_type: EventType) {
        self.state.lock().await.event_types.insert(event_type.id, event_type);
    }

    pub async fn seed_lead(&self, lead: Lead) {
        self.state.lock().await.leads.insert(lead.id, lead);
    }

    pub async fn seed_connection(&self, record: ConnectionRecord) {
        self.state.lock().await.connections.insert(record.id, record);
    }

    pub async fn notification_count(&self) -> usize {
        self.state.lock().await.notifications.len()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.state.lock().await.appointments.get(&id).cloned())
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut state = self.state.lock().await;
        if state.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Conflict(format!("appointment {} already exists", appointment.id)));
        }
        if let Some(existing) = state.overlapping(appointment) {
            return Err(StoreError::Conflict(format!(
                "overlaps appointment {}",
                existing.id
            )));
        }
        state.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut state = self.state.lock().await;
        if !state.appointments.contains_key(&appointment.id) {
            return Err(StoreError::NotFound(format!("appointment {}", appointment.id)));
        }
        if let Some(existing) = state.overlapping(appointment) {
            return Err(StoreError::Conflict(format!(
                "overlaps appointment {}",
                existing.id
            )));
        }
        state.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn list_occupying(&self, query: &BusyQuery) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        let mut busy: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| {
                a.is_occupying()
                    && a.clinic_id == query.clinic_id
                    && a.doctor_id == query.doctor_id
                    && a.start_time >= query.starts_from
                    && a.start_time < query.starts_before
                    && Some(a.id) != query.exclude_appointment_id
            })
            .cloned()
            .collect();
        busy.sort_by_key(|a| a.start_time);
        Ok(busy)
    }

    async fn list_upcoming(
        &self,
        clinic_id: Uuid,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        let mut upcoming: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| {
                a.clinic_id == clinic_id
                    && a.is_occupying()
                    && a.start_time > from
                    && to.map_or(true, |to| a.start_time <= to)
            })
            .cloned()
            .collect();
        upcoming.sort_by_key(|a| a.start_time);
        Ok(upcoming)
    }
}

#[async_trait]
impl EventTypeStore for InMemoryStore {
    async fn find(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<EventType>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .event_types
            .get(&id)
            .filter(|event_type| event_type.clinic_id == clinic_id)
            .cloned())
    }

    async fn list_active(&self, clinic_id: Uuid) -> Result<Vec<EventType>, StoreError> {
        let state = self.state.lock().await;
        let mut active: Vec<EventType> = state
            .event_types
            .values()
            .filter(|event_type| event_type.clinic_id == clinic_id && event_type.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(active)
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn upsert_pending(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let live = state.notifications.iter_mut().find(|entry| {
            entry.appointment_id == notification.appointment_id
                && entry.kind == notification.kind
                && entry.status != NotificationStatus::Cancelled
        });

        if let Some(entry) = live {
            return Ok(match entry.status {
                NotificationStatus::Pending | NotificationStatus::Failed => {
                    entry.status = NotificationStatus::Pending;
                    entry.channel = notification.channel;
                    entry.scheduled_for = notification.scheduled_for;
                    entry.payload = notification.payload.clone();
                    entry.failure = None;
                    entry.updated_at = now;
                    UpsertOutcome::Refreshed(entry.clone())
                }
                _ => UpsertOutcome::Unchanged(entry.clone()),
            });
        }

        let entry = NotificationQueueEntry {
            id: Uuid::new_v4(),
            clinic_id: notification.clinic_id,
            appointment_id: notification.appointment_id,
            kind: notification.kind,
            channel: notification.channel,
            status: NotificationStatus::Pending,
            scheduled_for: notification.scheduled_for,
            payload: notification.payload.clone(),
            failure: None,
            claimed_by: None,
            claimed_at: None,
            sent_at: None,
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        };
        state.notifications.push(entry.clone());
        Ok(UpsertOutcome::Inserted(entry))
    }

    async fn cancel_pending(
        &self,
        appointment_id: Uuid,
        kind: Option<NotificationKind>,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationQueueEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let mut cancelled = Vec::new();
        for entry in state.notifications.iter_mut().filter(|entry| {
            entry.appointment_id == appointment_id
                && entry.status == NotificationStatus::Pending
                && kind.map_or(true, |kind| entry.kind == kind)
        }) {
            entry.status = NotificationStatus::Cancelled;
            entry.updated_at = now;
            cancelled.push(entry.clone());
        }
        Ok(cancelled)
    }

    async fn list_due(&self, query: &DueQuery) -> Result<Vec<NotificationQueueEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<NotificationQueueEntry> = state
            .notifications
            .iter()
            .filter(|entry| {
                entry.status == NotificationStatus::Pending
                    && entry.channel == query.channel
                    && entry.scheduled_for <= query.now
                    && query.clinic_id.map_or(true, |clinic| entry.clinic_id == clinic)
            })
            .cloned()
            .collect();
        due.sort_by_key(|entry| entry.scheduled_for);
        due.truncate(query.limit);
        Ok(due)
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationQueueEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.notification_mut(id)?;
        if entry.status != NotificationStatus::Pending {
            return Ok(None);
        }
        entry.status = NotificationStatus::Processing;
        entry.claimed_by = Some(worker_id.to_string());
        entry.claimed_at = Some(now);
        entry.updated_at = now;
        Ok(Some(entry.clone()))
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        metadata: Value,
    ) -> Result<NotificationQueueEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.notification_mut(id)?;
        entry.status = NotificationStatus::Sent;
        entry.sent_at = Some(sent_at);
        entry.metadata = metadata;
        entry.updated_at = sent_at;
        Ok(entry.clone())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        failure: FailureInfo,
    ) -> Result<NotificationQueueEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.notification_mut(id)?;
        entry.status = NotificationStatus::Failed;
        entry.updated_at = failure.failed_at;
        entry.failure = Some(failure);
        Ok(entry.clone())
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<NotificationQueueEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.notification_mut(id)?;
        if matches!(entry.status, NotificationStatus::Pending | NotificationStatus::Processing) {
            entry.status = NotificationStatus::Cancelled;
            entry.updated_at = now;
        }
        Ok(entry.clone())
    }

    async fn expire_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for entry in state.notifications.iter_mut().filter(|entry| {
            entry.status == NotificationStatus::Processing
                && entry.claimed_at.map_or(true, |at| at < claimed_before)
        }) {
            entry.status = NotificationStatus::Failed;
            entry.failure = Some(FailureInfo {
                code: FailureCode::SendError,
                message: "claim expired before the send completed".to_string(),
                failed_at: now,
            });
            entry.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }

    async fn list_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<NotificationQueueEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|entry| entry.appointment_id == appointment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConnectionStore for InMemoryStore {
    async fn find_for_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .connections
            .values()
            .find(|r| r.clinic_id == clinic_id && r.doctor_id == doctor_id)
            .cloned())
    }

    async fn find_connected(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        Ok(self
            .find_for_doctor(clinic_id, doctor_id)
            .await?
            .filter(|r| r.status == ConnectionStatus::Connected))
    }

    async fn find_by_instance(&self, instance_name: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .connections
            .values()
            .find(|r| r.instance_name == instance_name)
            .cloned())
    }

    async fn upsert_for_doctor(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError> {
        let mut state = self.state.lock().await;

        if state.connections.values().any(|r| {
            r.instance_name == record.instance_name
                && (r.clinic_id, r.doctor_id) != (record.clinic_id, record.doctor_id)
        }) {
            return Err(StoreError::Conflict(format!(
                "instance name '{}' is already in use",
                record.instance_name
            )));
        }

        let existing = state
            .connections
            .values()
            .find(|r| r.clinic_id == record.clinic_id && r.doctor_id == record.doctor_id)
            .map(|r| (r.id, r.created_at));

        let mut stored = record.clone();
        if let Some((id, created_at)) = existing {
            stored.id = id;
            stored.created_at = created_at;
        }
        state.connections.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError> {
        let mut state = self.state.lock().await;
        if !state.connections.contains_key(&record.id) {
            return Err(StoreError::NotFound(format!("connection {}", record.id)));
        }
        state.connections.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .connections
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {}", id)))?;
        record.last_sync_at = Some(now);
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>, StoreError> {
        Ok(self.state.lock().await.patients.get(&id).cloned())
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.doctors.iter().find(|d| d.id == id).cloned())
    }

    async fn find_doctor_by_user(&self, user_id: &str) -> Result<Option<Doctor>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .doctors
            .iter()
            .find(|d| d.user_id.as_deref() == Some(user_id))
            .cloned())
    }

    async fn first_doctor(&self) -> Result<Option<Doctor>, StoreError> {
        Ok(self.state.lock().await.doctors.first().cloned())
    }

    async fn find_lead(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Lead>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.leads.get(&id).filter(|l| l.clinic_id == clinic_id).cloned())
    }

    async fn find_lead_by_phone(&self, clinic_id: Uuid, phone: &str) -> Result<Option<Lead>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .leads
            .values()
            .find(|l| {
                l.clinic_id == clinic_id
                    && l.phone.as_deref().map(normalize_phone).as_deref() == Some(phone)
            })
            .cloned())
    }

    async fn save_lead(&self, lead: &Lead) -> Result<Lead, StoreError> {
        let mut state = self.state.lock().await;
        state.leads.insert(lead.id, lead.clone());
        Ok(lead.clone())
    }
}
