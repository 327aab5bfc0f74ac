// libs/appointment-cell/src/services/leads.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use shared_database::DirectoryStore;
use shared_models::appointment::Appointment;
use shared_models::directory::{normalize_phone, Lead, LeadStatus};

use crate::models::AppointmentError;

/// Marks the intake lead behind a booking as scheduled.
pub struct LeadPromoter {
    directory: Arc<dyn DirectoryStore>,
}

impl LeadPromoter {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    /// Matches by the `lead_id` carried in metadata, else by the patient's
    /// phone within the clinic. `Ok(None)` when no lead matches.
    pub async fn promote(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, AppointmentError> {
        let Some(mut lead) = self.find_lead(appointment).await? else {
            debug!("No lead matches appointment {}", appointment.id);
            return Ok(None);
        };

        if lead.status == LeadStatus::Scheduled && lead.appointment_id == Some(appointment.id) {
            return Ok(Some(lead));
        }

        lead.status = LeadStatus::Scheduled;
        lead.appointment_id = Some(appointment.id);
        lead.updated_at = now;
        let saved = self.directory.save_lead(&lead).await?;
        info!("Lead {} promoted to scheduled by appointment {}", saved.id, appointment.id);
        Ok(Some(saved))
    }

    async fn find_lead(&self, appointment: &Appointment) -> Result<Option<Lead>, AppointmentError> {
        if let Some(lead_id) = appointment.lead_id() {
            if let Some(lead) = self.directory.find_lead(appointment.clinic_id, lead_id).await? {
                return Ok(Some(lead));
            }
        }

        let phone = self
            .directory
            .get_patient(appointment.patient_id)
            .await?
            .and_then(|patient| patient.phone)
            .map(|phone| normalize_phone(&phone))
            .filter(|digits| !digits.is_empty());

        match phone {
            Some(phone) => Ok(self
                .directory
                .find_lead_by_phone(appointment.clinic_id, &phone)
                .await?),
            None => Ok(None),
        }
    }
}
