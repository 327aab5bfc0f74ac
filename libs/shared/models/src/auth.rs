use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Reads a uuid stored in the user's metadata, e.g. `clinic_id`.
    pub fn metadata_uuid(&self, key: &str) -> Option<Uuid> {
        self.metadata
            .as_ref()?
            .get(key)?
            .as_str()
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// The clinic and doctor a request acts on behalf of.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClinicContext {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
}
