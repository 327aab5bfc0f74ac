// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use shared_models::appointment::{Appointment, EventType};
use shared_models::error::AppError;
use shared_utils::context::{ContextHint, ContextResolver};
use shared_utils::extractor::MaybeUser;

use crate::models::{
    AppointmentEnvelope, AvailabilityQuery, CreateAppointmentRequest, EventTypeQuery, Slot,
    UpdateAppointmentRequest,
};
use crate::services::{AppointmentBookingService, AvailabilityEngine, EventTypeResolver};

#[derive(Clone)]
pub struct AppointmentState {
    pub booking: Arc<AppointmentBookingService>,
    pub availability: Arc<AvailabilityEngine>,
    pub event_types: Arc<EventTypeResolver>,
    pub resolver: Arc<dyn ContextResolver>,
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentEnvelope>), AppError> {
    let outcome = state.booking.create(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state.booking.get(appointment_id).await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<AppointmentEnvelope>, AppError> {
    let outcome = state
        .booking
        .update(appointment_id, request, Utc::now())
        .await?;
    Ok(Json(outcome.into()))
}

// ==============================================================================
// SCHEDULING REFERENCE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<AppointmentState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    let (Some(clinic_id), Some(doctor_id), Some(date)) = (query.clinic_id, query.doctor_id, query.date)
    else {
        return Err(AppError::ValidationError(
            "clinic_id, doctor_id and date are required".to_string(),
        ));
    };

    let slots = state
        .availability
        .compute_slots(
            clinic_id,
            doctor_id,
            date,
            query.event_type_id,
            query.duration_minutes,
            Utc::now(),
        )
        .await?;
    Ok(Json(slots))
}

/// Active event types of a clinic; the clinic falls back to the caller's
/// context when omitted.
#[axum::debug_handler]
pub async fn list_event_types(
    State(state): State<AppointmentState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<EventTypeQuery>,
) -> Result<Json<Vec<EventType>>, AppError> {
    let clinic_id = match query.clinic_id {
        Some(clinic_id) => clinic_id,
        None => {
            state
                .resolver
                .resolve(user.as_ref(), ContextHint::default())
                .await?
                .clinic_id
        }
    };

    let event_types = state.event_types.list_active(clinic_id).await?;
    Ok(Json(event_types))
}
