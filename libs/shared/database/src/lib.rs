pub mod error;
pub mod memory;
pub mod postgrest;
pub mod store;
pub mod supabase;

use std::sync::Arc;

use tracing::info;

use shared_config::{AppConfig, DataBackend};

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgrest::SupabaseStore;
pub use store::*;

/// Handles to every table the services touch, independent of the backend.
#[derive(Clone)]
pub struct DataStore {
    pub appointments: Arc<dyn AppointmentStore>,
    pub event_types: Arc<dyn EventTypeStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub directory: Arc<dyn DirectoryStore>,
}

impl DataStore {
    pub fn from_config(config: &AppConfig) -> Self {
        match config.data_backend {
            DataBackend::Supabase => {
                info!("Using Supabase data store at {}", config.supabase_url);
                Self::supabase(Arc::new(SupabaseStore::new(config)))
            }
            DataBackend::Memory => {
                info!("Using in-memory data store");
                Self::in_memory(Arc::new(InMemoryStore::new()))
            }
        }
    }

    pub fn supabase(store: Arc<SupabaseStore>) -> Self {
        Self {
            appointments: store.clone(),
            event_types: store.clone(),
            notifications: store.clone(),
            connections: store.clone(),
            directory: store,
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            appointments: store.clone(),
            event_types: store.clone(),
            notifications: store.clone(),
            connections: store.clone(),
            directory: store,
        }
    }
}
