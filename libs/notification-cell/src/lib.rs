//! # Notification Cell
//!
//! Durable queue of patient notifications produced by appointment lifecycle
//! events, and the dispatcher that drains it through the messaging gateway.
//!
//! Entries are keyed by `(appointment_id, kind)`: at most one entry per key
//! is ever live (not cancelled). Dispatch claims each entry atomically before
//! sending, so concurrent batches never send the same entry twice.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::NotificationError;
pub use handlers::NotificationState;
pub use models::*;
pub use router::notification_routes;
pub use services::*;
