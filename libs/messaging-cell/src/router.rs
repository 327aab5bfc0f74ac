// libs/messaging-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::optional_auth_middleware;

use crate::handlers::*;

/// Channel routes, mounted under `/channels`. The webhook is called by the
/// gateway and carries no user token.
pub fn messaging_routes(config: Arc<AppConfig>, state: MessagingState) -> Router {
    let gateway_routes = Router::new().route("/webhook", post(channel_webhook));

    let user_routes = Router::new()
        .route("/status", get(channel_status))
        .route("/connect", post(connect_channel))
        .route("/disconnect", post(disconnect_channel))
        .layer(middleware::from_fn_with_state(config, optional_auth_middleware));

    Router::new()
        .merge(gateway_routes)
        .merge(user_routes)
        .with_state(state)
}
