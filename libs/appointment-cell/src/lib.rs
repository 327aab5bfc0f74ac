// libs/appointment-cell/src/lib.rs
//! # Appointment Cell
//!
//! Booking, rescheduling and availability for a doctor's calendar.
//!
//! No two occupying appointments (scheduled, confirmed, waiting,
//! in progress) of the same doctor may overlap. Windows are half-open, so
//! back-to-back bookings are allowed. Lifecycle side effects (lead
//! promotion, notification queueing) are best-effort and reported as
//! advisories next to the appointment.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::AppointmentState;
pub use models::AppointmentError;
pub use router::{appointment_routes, event_type_routes};
pub use services::*;
