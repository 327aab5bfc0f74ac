// libs/messaging-cell/src/services/mod.rs

pub mod connection;
pub mod gateway;
pub mod reconcile;

pub use connection::ChannelConnectionService;
pub use gateway::{EvolutionGatewayClient, MessagingGateway, UnconfiguredGateway};
pub use reconcile::{reconcile, ReadThroughCache, Reconciled};
