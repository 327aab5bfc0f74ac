// libs/notification-cell/src/services/dispatcher.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use messaging_cell::MessagingGateway;
use shared_config::{AppConfig, DispatchSettings};
use shared_database::{
    AppointmentStore, ConnectionStore, DataStore, DirectoryStore, DueQuery, NotificationStore,
    StoreError,
};
use shared_models::notification::{
    DeliveryChannel, FailureCode, FailureInfo, NotificationQueueEntry,
};

use crate::error::NotificationError;
use crate::models::{DispatchRequest, DispatchSummary, EntryOutcome};
use crate::services::templates::render;

/// Consumer side of the queue: claims due entries and pushes them through
/// the doctor's connected channel.
pub struct NotificationDispatcher {
    notifications: Arc<dyn NotificationStore>,
    appointments: Arc<dyn AppointmentStore>,
    directory: Arc<dyn DirectoryStore>,
    connections: Arc<dyn ConnectionStore>,
    gateway: Arc<dyn MessagingGateway>,
    settings: DispatchSettings,
    clinic_timezone: Tz,
    send_timeout: Duration,
    worker_id: String,
}

impl NotificationDispatcher {
    pub fn new(store: &DataStore, gateway: Arc<dyn MessagingGateway>, config: &AppConfig) -> Self {
        Self {
            notifications: store.notifications.clone(),
            appointments: store.appointments.clone(),
            directory: store.directory.clone(),
            connections: store.connections.clone(),
            gateway,
            settings: config.dispatch.clone(),
            clinic_timezone: config.scheduling.clinic_timezone,
            send_timeout: Duration::from_secs(config.gateway_timeout_secs.max(1)),
            worker_id: format!("dispatcher-{}", Uuid::new_v4().simple()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Runs one batch. Each entry is processed on its own; one entry's
    /// failure never affects the rest of the batch.
    #[instrument(skip(self), fields(worker = %self.worker_id))]
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, NotificationError> {
        let claimed_before = now - chrono::Duration::seconds(self.settings.claim_ttl_secs);
        let expired = self.notifications.expire_stale_claims(claimed_before, now).await?;
        if expired > 0 {
            warn!("Expired {} stale in-flight notifications", expired);
        }

        let limit = request.limit.unwrap_or(self.settings.batch_limit);
        if limit == 0 {
            return Ok(DispatchSummary::default());
        }

        let due = self
            .notifications
            .list_due(&DueQuery {
                channel: DeliveryChannel::Whatsapp,
                clinic_id: request.clinic_id,
                now,
                limit,
            })
            .await?;

        if due.is_empty() {
            debug!("No due notifications");
            return Ok(DispatchSummary::default());
        }

        let outcomes: Vec<EntryOutcome> = stream::iter(due)
            .map(|entry| self.process(entry, now))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut summary = DispatchSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }

        info!(
            "Dispatch batch done: {} sent, {} failed, {} skipped",
            summary.sent, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    async fn process(&self, entry: NotificationQueueEntry, now: DateTime<Utc>) -> EntryOutcome {
        let id = entry.id;
        match self.try_process(entry, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The claim, if taken, expires on a later batch.
                error!("Store error while dispatching notification {}: {}", id, e);
                EntryOutcome::Skipped
            }
        }
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id, kind = %entry.kind))]
    async fn try_process(
        &self,
        entry: NotificationQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome, StoreError> {
        let Some(entry) = self.notifications.claim(entry.id, &self.worker_id, now).await? else {
            debug!("Lost claim, another dispatcher has it");
            return Ok(EntryOutcome::Skipped);
        };

        let Some(appointment) = self.appointments.get(entry.appointment_id).await? else {
            let message = format!("appointment {} not found", entry.appointment_id);
            return self.fail(&entry, FailureCode::NoDoctorFound, message, now).await;
        };

        if !appointment.is_occupying() {
            self.notifications.mark_cancelled(entry.id, now).await?;
            info!("Appointment {} is {}, notification cancelled", appointment.id, appointment.status);
            return Ok(EntryOutcome::Skipped);
        }

        if self.directory.get_doctor(appointment.doctor_id).await?.is_none() {
            let message = format!("doctor {} not found", appointment.doctor_id);
            return self.fail(&entry, FailureCode::NoDoctorFound, message, now).await;
        }

        let Some(connection) = self
            .connections
            .find_connected(appointment.clinic_id, appointment.doctor_id)
            .await?
        else {
            let message = format!("no connected channel for doctor {}", appointment.doctor_id);
            return self.fail(&entry, FailureCode::ChannelNotConnected, message, now).await;
        };

        let text = render(entry.kind, &entry.payload, self.clinic_timezone);
        let send = self
            .gateway
            .send_text(&connection.instance_name, &entry.payload.to, &text);

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(sent)) => {
                let metadata = json!({
                    "gateway_message_id": sent.message_id,
                    "provider_response": sent.raw,
                    "instance_name": connection.instance_name,
                });
                self.notifications.mark_sent(entry.id, now, metadata).await?;
                info!("Notification sent via {}", connection.instance_name);
                Ok(EntryOutcome::Sent)
            }
            Ok(Err(e)) => self.fail(&entry, FailureCode::SendError, e.to_string(), now).await,
            Err(_) => {
                let message = format!(
                    "gateway did not answer within {}s",
                    self.send_timeout.as_secs()
                );
                self.fail(&entry, FailureCode::SendError, message, now).await
            }
        }
    }

    async fn fail(
        &self,
        entry: &NotificationQueueEntry,
        code: FailureCode,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome, StoreError> {
        warn!("Notification {} failed ({}): {}", entry.id, code, message);
        self.notifications
            .mark_failed(
                entry.id,
                FailureInfo {
                    code,
                    message,
                    failed_at: now,
                },
            )
            .await?;
        Ok(EntryOutcome::Failed(code))
    }
}
