// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::optional_auth_middleware;

use crate::handlers::{self, AppointmentState};

/// Mounted under `/appointments`.
pub fn appointment_routes(state: AppointmentState) -> Router {
    Router::new()
        .route("/", post(handlers::create_appointment))
        .route("/availability", get(handlers::get_availability))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).patch(handlers::update_appointment),
        )
        .with_state(state)
}

/// Mounted under `/event-types`.
pub fn event_type_routes(config: Arc<AppConfig>, state: AppointmentState) -> Router {
    Router::new()
        .route("/", get(handlers::list_event_types))
        .layer(middleware::from_fn_with_state(config, optional_auth_middleware))
        .with_state(state)
}
