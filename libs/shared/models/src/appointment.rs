use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    /// Always `start_time + duration_minutes`; recomputed on every time change.
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub event_type_id: Option<Uuid>,
    pub title: String,
    pub timezone: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_occupying(&self) -> bool {
        self.status.is_occupying()
    }

    /// Explicit lead identifier carried in metadata by intake flows.
    pub fn lead_id(&self) -> Option<Uuid> {
        self.metadata
            .get("lead_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Waiting,
    InProgress,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const OCCUPYING: [AppointmentStatus; 4] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Waiting,
        AppointmentStatus::InProgress,
    ];

    /// Statuses that count toward conflict detection.
    pub fn is_occupying(&self) -> bool {
        Self::OCCUPYING.contains(self)
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Waiting => "waiting",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference data: a named appointment type with a fixed duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventType {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub active: bool,
}
