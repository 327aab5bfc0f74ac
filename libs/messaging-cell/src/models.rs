// libs/messaging-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::connection::{ConnectionRecord, ConnectionStatus};
use shared_models::error::AppError;
use shared_models::outcome::Advisory;

// ==============================================================================
// GATEWAY VIEW
// ==============================================================================

/// Live connection state as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConnectionState {
    pub state: String,
    /// Owner identity (a JID or plain number) when the gateway exposes one.
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PairingMaterial {
    pub qr_code: Option<String>,
    pub pairing_code: Option<String>,
}

impl PairingMaterial {
    pub fn is_empty(&self) -> bool {
        self.qr_code.is_none() && self.pairing_code.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedInstance {
    pub instance_id: String,
    pub pairing: PairingMaterial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message_id: Option<String>,
    pub raw: Value,
}

/// What the reconciler derives from a gateway observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedConnection {
    pub status: ConnectionStatus,
    pub phone_number: Option<String>,
}

// ==============================================================================
// REQUEST / RESPONSE TYPES
// ==============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelQuery {
    pub clinic_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectChannelRequest {
    pub clinic_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub instance_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatusView {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub status: ConnectionStatus,
    pub instance_name: Option<String>,
    pub phone_number: Option<String>,
    pub qr_code: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl ChannelStatusView {
    pub fn disconnected(clinic_id: Uuid, doctor_id: Uuid) -> Self {
        Self {
            clinic_id,
            doctor_id,
            status: ConnectionStatus::Disconnected,
            instance_name: None,
            phone_number: None,
            qr_code: None,
            connected_at: None,
            last_sync_at: None,
        }
    }
}

impl From<&ConnectionRecord> for ChannelStatusView {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            clinic_id: record.clinic_id,
            doctor_id: record.doctor_id,
            status: record.status,
            instance_name: Some(record.instance_name.clone()),
            phone_number: record.phone_number.clone(),
            qr_code: record.qr_code.clone(),
            connected_at: record.connected_at,
            last_sync_at: record.last_sync_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectChannelResponse {
    pub connection: ChannelStatusView,
    pub pairing: PairingMaterial,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectChannelResponse {
    pub connection: ChannelStatusView,
    pub advisories: Vec<Advisory>,
}

/// Inbound gateway webhook. Only the fields the cache cares about are typed.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub instance: String,
    #[serde(default)]
    pub data: Value,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    #[error("Gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Messaging gateway not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("No channel connection found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::NotFound(message) => AppError::NotFound(message),
            MessagingError::Validation(message) => AppError::ValidationError(message),
            MessagingError::Gateway(GatewayError::NotConfigured) => {
                AppError::Internal("Messaging gateway not configured".to_string())
            }
            MessagingError::Gateway(e) => AppError::ExternalService(e.to_string()),
            MessagingError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
