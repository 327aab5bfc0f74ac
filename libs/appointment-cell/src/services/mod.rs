pub mod availability;
pub mod booking;
pub mod conflict;
pub mod event_type;
pub mod leads;

pub use availability::{AvailabilityEngine, SlotGrid};
pub use booking::AppointmentBookingService;
pub use conflict::{conflicts_with_any, TimeWindow};
pub use event_type::EventTypeResolver;
pub use leads::LeadPromoter;
