use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Purpose of a queued notification. Together with the appointment id this is
/// the idempotency key of the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    #[serde(rename = "confirmation_on_create")]
    ConfirmationOnCreate,
    #[serde(rename = "reminder_24h")]
    Reminder24h,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 2] = [
        NotificationKind::ConfirmationOnCreate,
        NotificationKind::Reminder24h,
    ];

    /// When an entry of this kind becomes eligible for dispatch, or `None`
    /// when it should not be enqueued at all.
    pub fn scheduled_for(
        &self,
        appointment_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            NotificationKind::ConfirmationOnCreate => Some(now),
            NotificationKind::Reminder24h => {
                let fire_at = appointment_start - Duration::hours(24);
                // No late reminders.
                (fire_at >= now).then_some(fire_at)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ConfirmationOnCreate => "confirmation_on_create",
            NotificationKind::Reminder24h => "reminder_24h",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    /// Claimed by a dispatcher, send in flight.
    Processing,
    Sent,
    Cancelled,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Cancelled => "cancelled",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    #[default]
    Whatsapp,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Whatsapp => "whatsapp",
        }
    }
}

/// Stable failure taxonomy recorded on failed entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    NoDoctorFound,
    ChannelNotConnected,
    SendError,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::NoDoctorFound => "no_doctor_found",
            FailureCode::ChannelNotConnected => "channel_not_connected",
            FailureCode::SendError => "send_error",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    /// Recipient phone number, digits only.
    pub to: String,
    pub recipient_name: String,
    pub appointment_start: DateTime<Utc>,
    pub timezone: String,
    pub title: String,
    /// Literal text overrides template rendering when present.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureInfo {
    pub code: FailureCode,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationQueueEntry {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_id: Uuid,
    pub kind: NotificationKind,
    pub channel: DeliveryChannel,
    pub status: NotificationStatus,
    pub scheduled_for: DateTime<Utc>,
    pub payload: NotificationPayload,
    pub failure: Option<FailureInfo>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert-or-refresh request for the `(appointment_id, kind)` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewNotification {
    pub clinic_id: Uuid,
    pub appointment_id: Uuid,
    pub kind: NotificationKind,
    pub channel: DeliveryChannel,
    pub scheduled_for: DateTime<Utc>,
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", content = "entry", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No live entry existed; a new pending row was written.
    Inserted(NotificationQueueEntry),
    /// A pending or failed entry was reset to pending with fresh timing and payload.
    Refreshed(NotificationQueueEntry),
    /// The live entry is sent or in flight and was left alone.
    Unchanged(NotificationQueueEntry),
}

impl UpsertOutcome {
    pub fn entry(&self) -> &NotificationQueueEntry {
        match self {
            UpsertOutcome::Inserted(entry)
            | UpsertOutcome::Refreshed(entry)
            | UpsertOutcome::Unchanged(entry) => entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reminder_is_dropped_when_the_window_has_passed() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let soon = now + Duration::hours(3);
        let later = now + Duration::hours(30);

        assert_eq!(NotificationKind::Reminder24h.scheduled_for(soon, now), None);
        assert_eq!(
            NotificationKind::Reminder24h.scheduled_for(later, now),
            Some(now + Duration::hours(6))
        );
    }

    #[test]
    fn confirmation_fires_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let start = now + Duration::hours(1);
        assert_eq!(NotificationKind::ConfirmationOnCreate.scheduled_for(start, now), Some(now));
    }

    #[test]
    fn kind_wire_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::Reminder24h).unwrap(),
            "\"reminder_24h\""
        );
        assert_eq!(FailureCode::ChannelNotConnected.to_string(), "channel_not_connected");
    }
}
