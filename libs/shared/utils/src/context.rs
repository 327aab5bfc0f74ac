use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::DirectoryStore;
use shared_models::auth::{ClinicContext, User};
use shared_models::error::AppError;

/// Partial identity carried by a request. Anything missing is filled in by
/// the resolver.
#[derive(Debug, Clone, Default)]
pub struct ContextHint {
    pub clinic_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

#[async_trait]
pub trait ContextResolver: Send + Sync {
    async fn resolve(&self, user: Option<&User>, hint: ContextHint) -> Result<ClinicContext, AppError>;
}

/// Authenticated identity first, then configured defaults, then the first
/// doctor on record.
pub struct LayeredContextResolver {
    directory: Arc<dyn DirectoryStore>,
    default_clinic_id: Option<Uuid>,
    default_doctor_id: Option<Uuid>,
}

impl LayeredContextResolver {
    pub fn new(config: &AppConfig, directory: Arc<dyn DirectoryStore>) -> Self {
        Self {
            directory,
            default_clinic_id: config.default_clinic_id,
            default_doctor_id: config.default_doctor_id,
        }
    }

    async fn from_user(&self, user: &User) -> Result<ContextHint, AppError> {
        let mut hint = ContextHint {
            clinic_id: user.metadata_uuid("clinic_id"),
            doctor_id: user.metadata_uuid("doctor_id"),
        };

        if hint.doctor_id.is_none() {
            if let Some(doctor) = self
                .directory
                .find_doctor_by_user(&user.id)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
            {
                hint.doctor_id = Some(doctor.id);
                hint.clinic_id = hint.clinic_id.or(Some(doctor.clinic_id));
            }
        }

        Ok(hint)
    }
}

#[async_trait]
impl ContextResolver for LayeredContextResolver {
    async fn resolve(&self, user: Option<&User>, hint: ContextHint) -> Result<ClinicContext, AppError> {
        let mut resolved = hint;

        if let Some(user) = user {
            let from_user = self.from_user(user).await?;
            resolved.clinic_id = resolved.clinic_id.or(from_user.clinic_id);
            resolved.doctor_id = resolved.doctor_id.or(from_user.doctor_id);
        }

        resolved.clinic_id = resolved.clinic_id.or(self.default_clinic_id);
        resolved.doctor_id = resolved.doctor_id.or(self.default_doctor_id);

        if resolved.clinic_id.is_none() || resolved.doctor_id.is_none() {
            let fallback = self
                .directory
                .first_doctor()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            if let Some(doctor) = fallback.filter(|d| resolved.clinic_id.map_or(true, |c| c == d.clinic_id)) {
                debug!("Falling back to first doctor on record: {}", doctor.id);
                resolved.clinic_id = resolved.clinic_id.or(Some(doctor.clinic_id));
                resolved.doctor_id = resolved.doctor_id.or(Some(doctor.id));
            }
        }

        match (resolved.clinic_id, resolved.doctor_id) {
            (Some(clinic_id), Some(doctor_id)) => Ok(ClinicContext { clinic_id, doctor_id }),
            _ => Err(AppError::ValidationError(
                "Could not resolve clinic and doctor for this request".to_string(),
            )),
        }
    }
}
