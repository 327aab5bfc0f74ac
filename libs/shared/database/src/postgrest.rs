use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::appointment::{Appointment, AppointmentStatus, EventType};
use shared_models::connection::{ConnectionRecord, ConnectionStatus};
use shared_models::directory::{Doctor, Lead, Patient};
use shared_models::notification::{
    FailureInfo, NewNotification, NotificationKind, NotificationQueueEntry, UpsertOutcome,
};

use crate::error::StoreError;
use crate::store::{
    AppointmentStore, BusyQuery, ConnectionStore, DirectoryStore, DueQuery, EventTypeStore,
    NotificationStore,
};
use crate::supabase::{PostgrestError, SupabaseClient};

const APPOINTMENTS: &str = "/rest/v1/appointments";
const EVENT_TYPES: &str = "/rest/v1/event_types";
const NOTIFICATIONS: &str = "/rest/v1/notification_queue";
const CONNECTIONS: &str = "/rest/v1/channel_connections";
const PATIENTS: &str = "/rest/v1/patients";
const DOCTORS: &str = "/rest/v1/doctors";
const LEADS: &str = "/rest/v1/leads";

fn ts(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339()).into_owned()
}

fn occupying_filter() -> String {
    let statuses: Vec<&str> = AppointmentStatus::OCCUPYING.iter().map(|s| s.as_str()).collect();
    format!("status=in.({})", statuses.join(","))
}

/// Constraint violations become `Conflict`, everything else is a backend failure.
fn map_error(error: anyhow::Error) -> StoreError {
    match error.downcast_ref::<PostgrestError>() {
        Some(pg) if pg.is_constraint_violation() => StoreError::Conflict(pg.message.clone()),
        Some(pg) if pg.status == 404 => StoreError::NotFound(pg.message.clone()),
        _ => StoreError::Backend(error.to_string()),
    }
}

fn first<T>(rows: Vec<T>, what: &str) -> Result<T, StoreError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(what.to_string()))
}

/// Store backed by Supabase's PostgREST API. Invariants that must hold under
/// concurrency live in the database: an exclusion constraint on appointment
/// ranges, a partial unique index on live queue entries, and the
/// `enqueue_notification` function.
pub struct SupabaseStore {
    client: SupabaseClient,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: SupabaseClient::new(config),
            service_key: config.supabase_service_key.clone(),
        }
    }

    async fn select<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        debug!("PostgREST select {}", path);
        self.client
            .request(Method::GET, path, Some(&self.service_key), None)
            .await
            .map_err(map_error)
    }

    async fn select_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        Ok(self.select(path).await?.into_iter().next())
    }

    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Value,
        merge_duplicates: bool,
    ) -> Result<Vec<T>, StoreError> {
        self.client
            .request_with_headers(
                method,
                path,
                Some(&self.service_key),
                Some(body),
                Some(SupabaseClient::representation_headers(merge_duplicates)),
            )
            .await
            .map_err(map_error)
    }

    async fn patch_notification(
        &self,
        id: Uuid,
        body: Value,
    ) -> Result<NotificationQueueEntry, StoreError> {
        let path = format!("{}?id=eq.{}", NOTIFICATIONS, id);
        let rows = self.write(Method::PATCH, &path, body, false).await?;
        first(rows, &format!("notification {}", id))
    }

    fn to_body<T: Serialize>(value: &T) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(value)?)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}", APPOINTMENTS, id)).await
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let rows = self
            .write(Method::POST, APPOINTMENTS, Self::to_body(appointment)?, false)
            .await?;
        first(rows, "inserted appointment")
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, appointment.id);
        let rows = self
            .write(Method::PATCH, &path, Self::to_body(appointment)?, false)
            .await?;
        first(rows, &format!("appointment {}", appointment.id))
    }

    async fn list_occupying(&self, query: &BusyQuery) -> Result<Vec<Appointment>, StoreError> {
        let mut path = format!(
            "{}?clinic_id=eq.{}&doctor_id=eq.{}&{}&start_time=gte.{}&start_time=lt.{}",
            APPOINTMENTS,
            query.clinic_id,
            query.doctor_id,
            occupying_filter(),
            ts(query.starts_from),
            ts(query.starts_before),
        );
        if let Some(exclude) = query.exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude));
        }
        path.push_str("&order=start_time.asc");
        self.select(&path).await
    }

    async fn list_upcoming(
        &self,
        clinic_id: Uuid,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut path = format!(
            "{}?clinic_id=eq.{}&{}&start_time=gt.{}",
            APPOINTMENTS,
            clinic_id,
            occupying_filter(),
            ts(from),
        );
        if let Some(to) = to {
            path.push_str(&format!("&start_time=lte.{}", ts(to)));
        }
        path.push_str("&order=start_time.asc");
        self.select(&path).await
    }
}

#[async_trait]
impl EventTypeStore for SupabaseStore {
    async fn find(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<EventType>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}&clinic_id=eq.{}", EVENT_TYPES, id, clinic_id))
            .await
    }

    async fn list_active(&self, clinic_id: Uuid) -> Result<Vec<EventType>, StoreError> {
        self.select(&format!(
            "{}?clinic_id=eq.{}&active=eq.true&order=title.asc",
            EVENT_TYPES, clinic_id
        ))
        .await
    }
}

#[async_trait]
impl NotificationStore for SupabaseStore {
    async fn upsert_pending(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        // The decision between insert, refresh and leave-alone happens inside
        // one database function so two callers can never both insert.
        let body = json!({
            "p_clinic_id": notification.clinic_id,
            "p_appointment_id": notification.appointment_id,
            "p_kind": notification.kind,
            "p_channel": notification.channel,
            "p_scheduled_for": notification.scheduled_for,
            "p_payload": notification.payload,
            "p_now": now,
        });
        self.client
            .request(
                Method::POST,
                "/rest/v1/rpc/enqueue_notification",
                Some(&self.service_key),
                Some(body),
            )
            .await
            .map_err(map_error)
    }

    async fn cancel_pending(
        &self,
        appointment_id: Uuid,
        kind: Option<NotificationKind>,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationQueueEntry>, StoreError> {
        let mut path = format!(
            "{}?appointment_id=eq.{}&status=eq.pending",
            NOTIFICATIONS, appointment_id
        );
        if let Some(kind) = kind {
            path.push_str(&format!("&kind=eq.{}", kind));
        }
        self.write(
            Method::PATCH,
            &path,
            json!({ "status": "cancelled", "updated_at": now }),
            false,
        )
        .await
    }

    async fn list_due(&self, query: &DueQuery) -> Result<Vec<NotificationQueueEntry>, StoreError> {
        let mut path = format!(
            "{}?status=eq.pending&channel=eq.{}&scheduled_for=lte.{}",
            NOTIFICATIONS,
            query.channel.as_str(),
            ts(query.now),
        );
        if let Some(clinic_id) = query.clinic_id {
            path.push_str(&format!("&clinic_id=eq.{}", clinic_id));
        }
        path.push_str(&format!("&order=scheduled_for.asc&limit={}", query.limit));
        self.select(&path).await
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationQueueEntry>, StoreError> {
        // Conditional on the row still being pending; zero rows back means
        // someone else claimed it.
        let path = format!("{}?id=eq.{}&status=eq.pending", NOTIFICATIONS, id);
        let rows = self
            .write(
                Method::PATCH,
                &path,
                json!({
                    "status": "processing",
                    "claimed_by": worker_id,
                    "claimed_at": now,
                    "updated_at": now,
                }),
                false,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        metadata: Value,
    ) -> Result<NotificationQueueEntry, StoreError> {
        self.patch_notification(
            id,
            json!({
                "status": "sent",
                "sent_at": sent_at,
                "metadata": metadata,
                "updated_at": sent_at,
            }),
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        failure: FailureInfo,
    ) -> Result<NotificationQueueEntry, StoreError> {
        let failed_at = failure.failed_at;
        self.patch_notification(
            id,
            json!({
                "status": "failed",
                "failure": failure,
                "updated_at": failed_at,
            }),
        )
        .await
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<NotificationQueueEntry, StoreError> {
        let path = format!(
            "{}?id=eq.{}&status=in.(pending,processing)",
            NOTIFICATIONS, id
        );
        let rows: Vec<NotificationQueueEntry> = self
            .write(
                Method::PATCH,
                &path,
                json!({ "status": "cancelled", "updated_at": now }),
                false,
            )
            .await?;
        match rows.into_iter().next() {
            Some(entry) => Ok(entry),
            None => self
                .select_one(&format!("{}?id=eq.{}", NOTIFICATIONS, id))
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("notification {}", id))),
        }
    }

    async fn expire_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let path = format!(
            "{}?status=eq.processing&claimed_at=lt.{}",
            NOTIFICATIONS,
            ts(claimed_before)
        );
        let rows: Vec<NotificationQueueEntry> = self
            .write(
                Method::PATCH,
                &path,
                json!({
                    "status": "failed",
                    "failure": {
                        "code": "send_error",
                        "message": "claim expired before the send completed",
                        "failed_at": now,
                    },
                    "updated_at": now,
                }),
                false,
            )
            .await?;
        Ok(rows.len())
    }

    async fn list_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<NotificationQueueEntry>, StoreError> {
        self.select(&format!(
            "{}?appointment_id=eq.{}&order=created_at.asc",
            NOTIFICATIONS, appointment_id
        ))
        .await
    }
}

#[async_trait]
impl ConnectionStore for SupabaseStore {
    async fn find_for_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        self.select_one(&format!(
            "{}?clinic_id=eq.{}&doctor_id=eq.{}",
            CONNECTIONS, clinic_id, doctor_id
        ))
        .await
    }

    async fn find_connected(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        self.select_one(&format!(
            "{}?clinic_id=eq.{}&doctor_id=eq.{}&status=eq.{}",
            CONNECTIONS,
            clinic_id,
            doctor_id,
            ConnectionStatus::Connected
        ))
        .await
    }

    async fn find_by_instance(&self, instance_name: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        self.select_one(&format!(
            "{}?instance_name=eq.{}",
            CONNECTIONS,
            urlencoding::encode(instance_name)
        ))
        .await
    }

    async fn upsert_for_doctor(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError> {
        let mut body = Self::to_body(record)?;
        // Let an existing row keep its identity on merge.
        if let Value::Object(map) = &mut body {
            map.remove("id");
            map.remove("created_at");
        }
        let path = format!("{}?on_conflict=clinic_id,doctor_id", CONNECTIONS);
        let rows = self.write(Method::POST, &path, body, true).await?;
        first(rows, "upserted connection")
    }

    async fn save(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError> {
        let path = format!("{}?id=eq.{}", CONNECTIONS, record.id);
        let rows = self
            .write(Method::PATCH, &path, Self::to_body(record)?, false)
            .await?;
        first(rows, &format!("connection {}", record.id))
    }

    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let path = format!("{}?id=eq.{}", CONNECTIONS, id);
        let _: Vec<Value> = self
            .write(Method::PATCH, &path, json!({ "last_sync_at": now }), false)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for SupabaseStore {
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}", PATIENTS, id)).await
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}", DOCTORS, id)).await
    }

    async fn find_doctor_by_user(&self, user_id: &str) -> Result<Option<Doctor>, StoreError> {
        self.select_one(&format!(
            "{}?user_id=eq.{}",
            DOCTORS,
            urlencoding::encode(user_id)
        ))
        .await
    }

    async fn first_doctor(&self) -> Result<Option<Doctor>, StoreError> {
        self.select_one(&format!("{}?order=created_at.asc&limit=1", DOCTORS))
            .await
    }

    async fn find_lead(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Lead>, StoreError> {
        self.select_one(&format!("{}?id=eq.{}&clinic_id=eq.{}", LEADS, id, clinic_id))
            .await
    }

    async fn find_lead_by_phone(&self, clinic_id: Uuid, phone: &str) -> Result<Option<Lead>, StoreError> {
        // `phone_digits` is a generated column holding the normalized number.
        self.select_one(&format!(
            "{}?clinic_id=eq.{}&phone_digits=eq.{}&limit=1",
            LEADS,
            clinic_id,
            urlencoding::encode(phone)
        ))
        .await
    }

    async fn save_lead(&self, lead: &Lead) -> Result<Lead, StoreError> {
        let path = format!("{}?id=eq.{}", LEADS, lead.id);
        let rows = self
            .write(
                Method::PATCH,
                &path,
                json!({
                    "status": lead.status,
                    "appointment_id": lead.appointment_id,
                    "updated_at": lead.updated_at,
                }),
                false,
            )
            .await?;
        first(rows, &format!("lead {}", lead.id))
    }
}
