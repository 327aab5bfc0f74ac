pub mod router;

pub use router::{create_router, gateway_from_config, AppServices};
