use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::notification::FailureCode;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchRequest {
    pub clinic_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchSummary {
    pub fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Sent => self.sent += 1,
            EntryOutcome::Failed(_) => self.failed += 1,
            EntryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// What happened to one entry of a dispatch batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Sent,
    Failed(FailureCode),
    /// Lost the claim or the appointment stopped occupying its slot.
    Skipped,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RebuildRequest {
    pub clinic_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub processed: usize,
    pub errors: usize,
}
