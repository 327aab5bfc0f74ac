use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    #[error("Patient {0} has no phone number to notify")]
    MissingRecipient(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::AppointmentNotFound(id) => {
                AppError::NotFound(format!("Appointment {} not found", id))
            }
            NotificationError::MissingRecipient(_) | NotificationError::ValidationError(_) => {
                AppError::ValidationError(err.to_string())
            }
            NotificationError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
