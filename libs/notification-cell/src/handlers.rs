use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use shared_models::{error::AppError, notification::NotificationQueueEntry};

use crate::models::{DispatchRequest, DispatchSummary, RebuildRequest, RebuildSummary};
use crate::services::{NotificationDispatcher, NotificationQueueService};

#[derive(Clone)]
pub struct NotificationState {
    pub queue: Arc<NotificationQueueService>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

/// Run one dispatch batch. The body is optional; an empty body uses the
/// configured batch limit across all clinics.
pub async fn dispatch_notifications(
    State(state): State<NotificationState>,
    body: Bytes,
) -> Result<Json<DispatchSummary>, AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        DispatchRequest::default()
    } else {
        serde_json::from_slice::<DispatchRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid dispatch request: {}", e)))?
    };

    info!("Dispatch requested (clinic: {:?}, limit: {:?})", request.clinic_id, request.limit);
    let summary = state.dispatcher.dispatch(request, Utc::now()).await?;
    Ok(Json(summary))
}

pub async fn rebuild_queue(
    State(state): State<NotificationState>,
    Json(request): Json<RebuildRequest>,
) -> Result<Json<RebuildSummary>, AppError> {
    let clinic_id = request
        .clinic_id
        .ok_or_else(|| AppError::ValidationError("clinic_id is required".to_string()))?;

    let summary = state
        .queue
        .rebuild(clinic_id, request.from, request.to, Utc::now())
        .await?;
    Ok(Json(summary))
}

/// Every queue entry of an appointment, cancelled history included.
pub async fn appointment_notifications(
    State(state): State<NotificationState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Vec<NotificationQueueEntry>>, AppError> {
    let entries = state.queue.list_for_appointment(appointment_id).await?;
    Ok(Json(entries))
}
