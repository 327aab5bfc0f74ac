// libs/messaging-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use shared_models::error::AppError;
use shared_utils::context::{ContextHint, ContextResolver};
use shared_utils::extractor::MaybeUser;

use crate::models::{
    ChannelQuery, ChannelStatusView, ConnectChannelRequest, ConnectChannelResponse,
    DisconnectChannelResponse, WebhookEvent,
};
use crate::services::ChannelConnectionService;

#[derive(Clone)]
pub struct MessagingState {
    pub service: Arc<ChannelConnectionService>,
    pub resolver: Arc<dyn ContextResolver>,
}

#[axum::debug_handler]
pub async fn channel_status(
    State(state): State<MessagingState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<ChannelStatusView>, AppError> {
    let context = state
        .resolver
        .resolve(
            user.as_ref(),
            ContextHint {
                clinic_id: query.clinic_id,
                doctor_id: query.doctor_id,
            },
        )
        .await?;

    let view = state.service.status(context, Utc::now()).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn connect_channel(
    State(state): State<MessagingState>,
    MaybeUser(user): MaybeUser,
    Json(request): Json<ConnectChannelRequest>,
) -> Result<Json<ConnectChannelResponse>, AppError> {
    let context = state
        .resolver
        .resolve(
            user.as_ref(),
            ContextHint {
                clinic_id: request.clinic_id,
                doctor_id: request.doctor_id,
            },
        )
        .await?;

    let response = state
        .service
        .connect(context, request.instance_name, Utc::now())
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn disconnect_channel(
    State(state): State<MessagingState>,
    MaybeUser(user): MaybeUser,
    Json(request): Json<ChannelQuery>,
) -> Result<Json<DisconnectChannelResponse>, AppError> {
    let context = state
        .resolver
        .resolve(
            user.as_ref(),
            ContextHint {
                clinic_id: request.clinic_id,
                doctor_id: request.doctor_id,
            },
        )
        .await?;

    let response = state.service.disconnect(context, Utc::now()).await?;
    Ok(Json(response))
}

/// Gateway callback. Always acknowledged so the gateway does not retry
/// events for instances we no longer track.
#[axum::debug_handler]
pub async fn channel_webhook(
    State(state): State<MessagingState>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<Value>, AppError> {
    let handled = state.service.handle_webhook(event, Utc::now()).await?;
    Ok(Json(json!({ "received": true, "handled": handled })))
}
