use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    appointment_notifications, dispatch_notifications, rebuild_queue, NotificationState,
};

/// Queue routes, mounted under `/notifications`.
pub fn notification_routes(state: NotificationState) -> Router {
    Router::new()
        .route("/dispatch", post(dispatch_notifications))
        .route("/rebuild", post(rebuild_queue))
        .route("/appointments/{appointment_id}", get(appointment_notifications))
        .with_state(state)
}
