use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use shared_models::appointment::{Appointment, EventType};
use shared_models::connection::ConnectionRecord;
use shared_models::directory::{Doctor, Lead, Patient};
use shared_models::notification::{
    DeliveryChannel, FailureInfo, NewNotification, NotificationKind, NotificationQueueEntry,
    UpsertOutcome,
};

use crate::error::StoreError;

/// Occupying appointments for one doctor whose start lies in
/// `[starts_from, starts_before)`.
#[derive(Debug, Clone)]
pub struct BusyQuery {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub starts_from: DateTime<Utc>,
    pub starts_before: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct DueQuery {
    pub channel: DeliveryChannel,
    pub clinic_id: Option<Uuid>,
    pub now: DateTime<Utc>,
    pub limit: usize,
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Persists a new appointment. Fails with `StoreError::Conflict` when an
    /// occupying appointment would overlap another for the same doctor.
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError>;

    /// Replaces an existing appointment under the same overlap constraint.
    async fn update(&self, appointment: &Appointment) -> Result<Appointment, StoreError>;

    async fn list_occupying(&self, query: &BusyQuery) -> Result<Vec<Appointment>, StoreError>;

    /// Occupying appointments of a clinic starting after `from` (and at or
    /// before `to` when given), ordered by start.
    async fn list_upcoming(
        &self,
        clinic_id: Uuid,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError>;
}

#[async_trait]
pub trait EventTypeStore: Send + Sync {
    async fn find(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<EventType>, StoreError>;

    async fn list_active(&self, clinic_id: Uuid) -> Result<Vec<EventType>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Idempotent upsert keyed by `(appointment_id, kind)` among entries that
    /// are not cancelled.
    async fn upsert_pending(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Moves pending entries of an appointment (optionally of one kind) to
    /// cancelled and returns them.
    async fn cancel_pending(
        &self,
        appointment_id: Uuid,
        kind: Option<NotificationKind>,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationQueueEntry>, StoreError>;

    async fn list_due(&self, query: &DueQuery) -> Result<Vec<NotificationQueueEntry>, StoreError>;

    /// Atomically moves a pending entry to processing. `None` means another
    /// worker got there first or the entry is no longer pending.
    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationQueueEntry>, StoreError>;

    async fn mark_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        metadata: Value,
    ) -> Result<NotificationQueueEntry, StoreError>;

    async fn mark_failed(
        &self,
        id: Uuid,
        failure: FailureInfo,
    ) -> Result<NotificationQueueEntry, StoreError>;

    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<NotificationQueueEntry, StoreError>;

    /// Fails processing entries claimed before `claimed_before`.
    async fn expire_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn list_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<NotificationQueueEntry>, StoreError>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn find_for_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError>;

    async fn find_connected(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError>;

    async fn find_by_instance(&self, instance_name: &str) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Insert-or-update keyed by `(clinic_id, doctor_id)`.
    async fn upsert_for_doctor(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError>;

    async fn save(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError>;

    /// Heartbeat-only write.
    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>, StoreError>;

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>, StoreError>;

    async fn find_doctor_by_user(&self, user_id: &str) -> Result<Option<Doctor>, StoreError>;

    async fn first_doctor(&self) -> Result<Option<Doctor>, StoreError>;

    async fn find_lead(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Lead>, StoreError>;

    /// `phone` must already be normalized to digits.
    async fn find_lead_by_phone(&self, clinic_id: Uuid, phone: &str) -> Result<Option<Lead>, StoreError>;

    async fn save_lead(&self, lead: &Lead) -> Result<Lead, StoreError>;
}
