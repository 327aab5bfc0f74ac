// libs/messaging-cell/src/lib.rs
//! # Messaging Cell
//!
//! Owns the doctor's WhatsApp channel: the gateway client used to pair and
//! send, and the cached connection record kept in step with the gateway.
//!
//! ```text
//! +-----------------------------------------------------+
//! |                  Messaging Cell                     |
//! +-----------------------------------------------------+
//! |  handlers.rs      |  HTTP endpoint handlers         |
//! |  router.rs        |  Route definitions              |
//! |  models.rs        |  Gateway view, DTOs, errors     |
//! |  services/        |                                 |
//! |    gateway.rs     |  Gateway trait + REST client    |
//! |    reconcile.rs   |  Read-through reconciliation    |
//! |    connection.rs  |  Status, connect, disconnect    |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /channels/status` - reconciled connection status
//! - `POST /channels/connect` - create or reuse an instance, return pairing material
//! - `POST /channels/disconnect` - tear down the instance and mark disconnected
//! - `POST /channels/webhook` - gateway push events
//!
//! The gateway is authoritative. Status reads never fail because of it: an
//! unreachable gateway yields the last cached status.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod test_support;

pub use handlers::MessagingState;
pub use models::{GatewayError, MessagingError};
pub use router::messaging_routes;
pub use services::{ChannelConnectionService, EvolutionGatewayClient, MessagingGateway};
