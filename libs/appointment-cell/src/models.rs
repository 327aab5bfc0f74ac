use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::error::AppError;
use shared_models::outcome::{Advisory, Outcome};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Booking request. Identity fields are optional at the wire level so a
/// missing one is reported as a validation error rather than a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAppointmentRequest {
    pub clinic_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub event_type_id: Option<Uuid>,
    pub duration_minutes: Option<i32>,
    pub title: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub event_type_id: Option<Uuid>,
    pub duration_minutes: Option<i32>,
    pub title: Option<String>,
    pub timezone: Option<String>,
    /// Shallow-merged into the stored metadata.
    pub metadata: Option<Map<String, Value>>,
}

impl UpdateAppointmentRequest {
    pub fn changes_time(&self) -> bool {
        self.start_time.is_some() || self.event_type_id.is_some() || self.duration_minutes.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub clinic_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub event_type_id: Option<Uuid>,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTypeQuery {
    pub clinic_id: Option<Uuid>,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Local wall-clock start, `HH:MM`.
    pub display: String,
}

/// Duration and label picked for a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDuration {
    pub minutes: i32,
    pub label: String,
    pub event_type_id: Option<Uuid>,
}

/// Appointment body with the advisories of its side effects alongside.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentEnvelope {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub advisories: Vec<Advisory>,
}

impl From<Outcome<Appointment>> for AppointmentEnvelope {
    fn from(outcome: Outcome<Appointment>) -> Self {
        Self {
            appointment: outcome.primary,
            advisories: outcome.advisories,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictWindow {
    pub appointment_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
}

impl From<&Appointment> for ConflictWindow {
    fn from(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id,
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            status: appointment.status,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Time slot conflicts with {} existing appointment(s)", .0.len())]
    Conflict(Vec<ConflictWindow>),

    /// The store's overlap constraint rejected a write that passed the
    /// in-process check, i.e. a concurrent booking won the slot.
    #[error("Time slot was just taken by another booking")]
    SlotTaken,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => AppointmentError::SlotTaken,
            other => AppointmentError::Store(other),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(_) => AppError::NotFound(err.to_string()),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::Conflict(ref conflicts) => AppError::Conflict {
                message: err.to_string(),
                details: Some(json!(conflicts)),
            },
            AppointmentError::SlotTaken => AppError::conflict(err.to_string()),
            AppointmentError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
