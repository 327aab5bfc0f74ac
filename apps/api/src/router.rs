use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::{error, info, warn};

use appointment_cell::{
    appointment_routes, event_type_routes, AppointmentBookingService, AppointmentState,
    AvailabilityEngine, EventTypeResolver,
};
use messaging_cell::services::UnconfiguredGateway;
use messaging_cell::{
    messaging_routes, ChannelConnectionService, EvolutionGatewayClient, MessagingGateway,
    MessagingState,
};
use notification_cell::{
    notification_routes, NotificationDispatcher, NotificationQueueService, NotificationState,
};
use shared_config::AppConfig;
use shared_database::DataStore;
use shared_utils::context::{ContextResolver, LayeredContextResolver};

/// Every service the HTTP surface and the background worker share.
#[derive(Clone)]
pub struct AppServices {
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub appointments: AppointmentState,
    pub notifications: NotificationState,
    pub messaging: MessagingState,
}

impl AppServices {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let store = DataStore::from_config(&config);
        let gateway = gateway_from_config(&config);
        Self::new(config, store, gateway)
    }

    pub fn new(config: Arc<AppConfig>, store: DataStore, gateway: Arc<dyn MessagingGateway>) -> Self {
        let resolver: Arc<dyn ContextResolver> =
            Arc::new(LayeredContextResolver::new(&config, store.directory.clone()));

        let event_types = Arc::new(EventTypeResolver::new(
            store.event_types.clone(),
            &config.scheduling,
        ));
        let queue = Arc::new(NotificationQueueService::new(&store));
        let dispatcher = Arc::new(NotificationDispatcher::new(&store, gateway.clone(), &config));

        let appointments = AppointmentState {
            booking: Arc::new(AppointmentBookingService::new(
                &store,
                event_types.clone(),
                queue.clone(),
                config.scheduling.clone(),
            )),
            availability: Arc::new(AvailabilityEngine::new(
                store.appointments.clone(),
                event_types.clone(),
                config.scheduling.clone(),
            )),
            event_types,
            resolver: resolver.clone(),
        };

        let messaging = MessagingState {
            service: Arc::new(ChannelConnectionService::new(store.connections.clone(), gateway)),
            resolver,
        };

        Self {
            notifications: NotificationState {
                queue,
                dispatcher: dispatcher.clone(),
            },
            config,
            dispatcher,
            appointments,
            messaging,
        }
    }
}

/// The REST gateway client when configured; otherwise a stand-in that
/// fails every call.
pub fn gateway_from_config(config: &AppConfig) -> Arc<dyn MessagingGateway> {
    if !config.is_messaging_configured() {
        warn!("Messaging gateway not configured, channel operations will fail");
        return Arc::new(UnconfiguredGateway);
    }

    match EvolutionGatewayClient::new(config) {
        Ok(client) => {
            info!("Messaging gateway at {}", config.messaging_gateway_url);
            Arc::new(client)
        }
        Err(e) => {
            error!("Failed to build messaging gateway client: {}", e);
            Arc::new(UnconfiguredGateway)
        }
    }
}

pub fn create_router(services: &AppServices) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic Scheduler API is running!" }))
        .nest("/appointments", appointment_routes(services.appointments.clone()))
        .nest(
            "/event-types",
            event_type_routes(services.config.clone(), services.appointments.clone()),
        )
        .nest("/notifications", notification_routes(services.notifications.clone()))
        .nest(
            "/channels",
            messaging_routes(services.config.clone(), services.messaging.clone()),
        )
}
