// libs/messaging-cell/src/services/connection.rs
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::{ConnectionStore, StoreError};
use shared_models::auth::ClinicContext;
use shared_models::connection::{ConnectionRecord, ConnectionStatus};
use shared_models::directory::normalize_phone;
use shared_models::outcome::Outcome;

use crate::models::{
    ChannelStatusView, ConnectChannelResponse, DisconnectChannelResponse, GatewayConnectionState,
    GatewayError, MessagingError, ObservedConnection, PairingMaterial, WebhookEvent,
};
use crate::services::gateway::{owner_identity, pairing_from, MessagingGateway};
use crate::services::reconcile::{reconcile, ReadThroughCache, Reconciled};

/// Maps a gateway state name onto the cached status enum.
pub fn derive_status(state: &str) -> ConnectionStatus {
    match state {
        "open" => ConnectionStatus::Connected,
        "connecting" | "pairing" | "refused" => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Disconnected,
    }
}

pub fn observe(state: &GatewayConnectionState) -> ObservedConnection {
    let status = derive_status(&state.state);
    let phone_number = match status {
        ConnectionStatus::Connected => state
            .owner
            .as_deref()
            .map(normalize_phone)
            .filter(|digits| !digits.is_empty()),
        _ => None,
    };
    ObservedConnection { status, phone_number }
}

fn observation_differs(cached: &ConnectionRecord, observed: &ObservedConnection) -> bool {
    if cached.status != observed.status {
        return true;
    }
    observed.status == ConnectionStatus::Connected
        && observed.phone_number.is_some()
        && observed.phone_number != cached.phone_number
}

fn apply_observation(
    cached: &ConnectionRecord,
    observed: ObservedConnection,
    now: DateTime<Utc>,
) -> ConnectionRecord {
    let mut record = cached.clone();
    if observed.status == ConnectionStatus::Connected {
        record.qr_code = None;
        if cached.status != ConnectionStatus::Connected {
            record.connected_at = Some(now);
        }
        if observed.phone_number.is_some() {
            record.phone_number = observed.phone_number;
        }
    }
    record.status = observed.status;
    record.last_sync_at = Some(now);
    record.updated_at = now;
    record
}

/// Cache binding that polls the gateway.
struct GatewayOracle<'a> {
    gateway: &'a dyn MessagingGateway,
    connections: &'a dyn ConnectionStore,
}

#[async_trait]
impl ReadThroughCache for GatewayOracle<'_> {
    type Record = ConnectionRecord;
    type Observed = ObservedConnection;
    type Error = GatewayError;

    async fn observe(&self, cached: &ConnectionRecord) -> Result<ObservedConnection, GatewayError> {
        let state = self.gateway.connection_state(&cached.instance_name).await?;
        Ok(observe(&state))
    }

    fn differs(&self, cached: &ConnectionRecord, observed: &ObservedConnection) -> bool {
        observation_differs(cached, observed)
    }

    fn apply(&self, cached: &ConnectionRecord, observed: ObservedConnection, now: DateTime<Utc>) -> ConnectionRecord {
        apply_observation(cached, observed, now)
    }

    async fn write_back(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError> {
        self.connections.save(record).await
    }

    async fn heartbeat(&self, record: &ConnectionRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.connections.touch(record.id, now).await
    }
}

/// Cache binding fed by a webhook push instead of a poll.
struct PushedState<'a> {
    observed: ObservedConnection,
    connections: &'a dyn ConnectionStore,
}

#[async_trait]
impl ReadThroughCache for PushedState<'_> {
    type Record = ConnectionRecord;
    type Observed = ObservedConnection;
    type Error = Infallible;

    async fn observe(&self, _cached: &ConnectionRecord) -> Result<ObservedConnection, Infallible> {
        Ok(self.observed.clone())
    }

    fn differs(&self, cached: &ConnectionRecord, observed: &ObservedConnection) -> bool {
        observation_differs(cached, observed)
    }

    fn apply(&self, cached: &ConnectionRecord, observed: ObservedConnection, now: DateTime<Utc>) -> ConnectionRecord {
        apply_observation(cached, observed, now)
    }

    async fn write_back(&self, record: &ConnectionRecord) -> Result<ConnectionRecord, StoreError> {
        self.connections.save(record).await
    }

    async fn heartbeat(&self, record: &ConnectionRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.connections.touch(record.id, now).await
    }
}

pub struct ChannelConnectionService {
    connections: Arc<dyn ConnectionStore>,
    gateway: Arc<dyn MessagingGateway>,
}

impl ChannelConnectionService {
    pub fn new(connections: Arc<dyn ConnectionStore>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { connections, gateway }
    }

    pub fn gateway(&self) -> Arc<dyn MessagingGateway> {
        Arc::clone(&self.gateway)
    }

    /// Reconciled status for a doctor's channel. Never fails because of the
    /// gateway; only store reads can fail.
    #[instrument(skip(self))]
    pub async fn status(
        &self,
        context: ClinicContext,
        now: DateTime<Utc>,
    ) -> Result<ChannelStatusView, MessagingError> {
        let Some(record) = self
            .connections
            .find_for_doctor(context.clinic_id, context.doctor_id)
            .await?
        else {
            debug!("No connection record, reporting disconnected");
            return Ok(ChannelStatusView::disconnected(context.clinic_id, context.doctor_id));
        };

        if record.instance_id.is_none() {
            // Torn down locally; there is nothing on the gateway to ask about.
            return Ok(ChannelStatusView::from(&record));
        }

        let oracle = GatewayOracle {
            gateway: self.gateway.as_ref(),
            connections: self.connections.as_ref(),
        };
        let reconciled = reconcile(&oracle, record, now).await;
        if let Reconciled::Changed(record) = &reconciled {
            info!("Channel {} is now {}", record.instance_name, record.status);
        }
        Ok(ChannelStatusView::from(reconciled.record()))
    }

    #[instrument(skip(self))]
    pub async fn connect(
        &self,
        context: ClinicContext,
        instance_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ConnectChannelResponse, MessagingError> {
        let instance_name = match instance_name.map(|n| n.trim().to_string()) {
            Some(name) if name.is_empty() => {
                return Err(MessagingError::Validation("instance_name must not be empty".to_string()))
            }
            Some(name) => name,
            None => default_instance_name(context.doctor_id),
        };

        let (instance_id, mut pairing) = match self.gateway.create_instance(&instance_name).await {
            Ok(created) => (created.instance_id, created.pairing),
            Err(GatewayError::AlreadyExists(_)) => {
                info!("Gateway instance {} already exists, reusing it", instance_name);
                (instance_name.clone(), PairingMaterial::default())
            }
            Err(e) => return Err(e.into()),
        };

        if pairing.qr_code.is_none() {
            pairing = self.gateway.fetch_pairing(&instance_name).await?;
        }

        let existing = self
            .connections
            .find_for_doctor(context.clinic_id, context.doctor_id)
            .await?;

        let record = ConnectionRecord {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |r| r.id),
            clinic_id: context.clinic_id,
            doctor_id: context.doctor_id,
            instance_name,
            instance_id: Some(instance_id),
            status: ConnectionStatus::Connecting,
            qr_code: pairing.qr_code.clone(),
            phone_number: existing.as_ref().and_then(|r| r.phone_number.clone()),
            connected_at: None,
            last_sync_at: Some(now),
            created_at: existing.as_ref().map_or(now, |r| r.created_at),
            updated_at: now,
        };

        let stored = self.connections.upsert_for_doctor(&record).await?;
        info!("Channel {} awaiting pairing", stored.instance_name);

        Ok(ConnectChannelResponse {
            connection: ChannelStatusView::from(&stored),
            pairing,
        })
    }

    /// Logs out and deletes the gateway instance on a best-effort basis, then
    /// marks the local record disconnected regardless.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        context: ClinicContext,
        now: DateTime<Utc>,
    ) -> Result<DisconnectChannelResponse, MessagingError> {
        let Some(mut record) = self
            .connections
            .find_for_doctor(context.clinic_id, context.doctor_id)
            .await?
        else {
            return Ok(DisconnectChannelResponse {
                connection: ChannelStatusView::disconnected(context.clinic_id, context.doctor_id),
                advisories: Vec::new(),
            });
        };

        let mut outcome = Outcome::new(());
        outcome.absorb("gateway_logout", self.gateway.logout(&record.instance_name).await);
        outcome.absorb(
            "gateway_delete_instance",
            self.gateway.delete_instance(&record.instance_name).await,
        );

        record.status = ConnectionStatus::Disconnected;
        record.qr_code = None;
        record.instance_id = None;
        record.last_sync_at = Some(now);
        record.updated_at = now;
        let stored = self.connections.save(&record).await?;

        Ok(DisconnectChannelResponse {
            connection: ChannelStatusView::from(&stored),
            advisories: outcome.advisories,
        })
    }

    /// Applies a pushed gateway event to the record owning `event.instance`.
    /// Returns whether any record was found for it.
    #[instrument(skip(self, event), fields(event = %event.event, instance = %event.instance))]
    pub async fn handle_webhook(&self, event: WebhookEvent, now: DateTime<Utc>) -> Result<bool, MessagingError> {
        let Some(record) = self.connections.find_by_instance(&event.instance).await? else {
            warn!("Webhook for unknown instance {}", event.instance);
            return Ok(false);
        };

        match normalize_event_name(&event.event).as_str() {
            "connection.update" => {
                let state = GatewayConnectionState {
                    state: event
                        .data
                        .get("state")
                        .and_then(|s| s.as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                    owner: owner_identity(&event.data).or_else(|| {
                        event.data.get("wuid").and_then(|w| w.as_str()).map(str::to_string)
                    }),
                };
                let pushed = PushedState {
                    observed: observe(&state),
                    connections: self.connections.as_ref(),
                };
                reconcile(&pushed, record, now).await;
            }
            "qrcode.updated" => {
                let pairing = pairing_from(&event.data);
                if record.status != ConnectionStatus::Connected && pairing.qr_code.is_some() {
                    let mut record = record;
                    record.qr_code = pairing.qr_code;
                    record.status = ConnectionStatus::Connecting;
                    record.updated_at = now;
                    self.connections.save(&record).await?;
                }
            }
            other => debug!("Ignoring webhook event {}", other),
        }

        Ok(true)
    }
}

/// Gateways send either `connection.update` or `CONNECTION_UPDATE`.
fn normalize_event_name(event: &str) -> String {
    event.to_lowercase().replace('_', ".")
}

fn default_instance_name(doctor_id: Uuid) -> String {
    format!("doctor-{}", doctor_id.simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_states_map_onto_cached_statuses() {
        assert_eq!(derive_status("open"), ConnectionStatus::Connected);
        assert_eq!(derive_status("connecting"), ConnectionStatus::Connecting);
        assert_eq!(derive_status("pairing"), ConnectionStatus::Connecting);
        assert_eq!(derive_status("refused"), ConnectionStatus::Connecting);
        assert_eq!(derive_status("close"), ConnectionStatus::Disconnected);
        assert_eq!(derive_status("whatever"), ConnectionStatus::Disconnected);
    }

    #[test]
    fn phone_is_only_derived_when_open() {
        let open = observe(&GatewayConnectionState {
            state: "open".to_string(),
            owner: Some("5511999990000@s.whatsapp.net".to_string()),
        });
        assert_eq!(open.phone_number.as_deref(), Some("5511999990000"));

        let closed = observe(&GatewayConnectionState {
            state: "close".to_string(),
            owner: Some("5511999990000@s.whatsapp.net".to_string()),
        });
        assert_eq!(closed.phone_number, None);
    }

    #[test]
    fn event_names_are_normalized() {
        assert_eq!(normalize_event_name("CONNECTION_UPDATE"), "connection.update");
        assert_eq!(normalize_event_name("qrcode.updated"), "qrcode.updated");
    }
}
