use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, DataBackend};
use shared_models::appointment::{Appointment, AppointmentStatus, EventType};
use shared_models::auth::User;
use shared_models::connection::{ConnectionRecord, ConnectionStatus};
use shared_models::directory::{Doctor, Lead, LeadStatus, Patient};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub messaging_gateway_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            messaging_gateway_url: "http://localhost:8080".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_gateway(url: &str) -> Self {
        Self {
            messaging_gateway_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_key: "test-service-key".to_string(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            data_backend: DataBackend::Memory,
            messaging_gateway_url: self.messaging_gateway_url.clone(),
            messaging_gateway_api_key: "test-gateway-key".to_string(),
            messaging_webhook_url: "http://localhost:3000/channels/webhook".to_string(),
            gateway_timeout_secs: 2,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub metadata: Option<Value>,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::new("test@example.com", "authenticated")
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            metadata: None,
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn with_clinic(mut self, clinic_id: Uuid) -> Self {
        self.metadata = Some(json!({ "clinic_id": clinic_id }));
        self
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: self.metadata.clone(),
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "app_metadata": user.metadata,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

pub fn patient_fixture(clinic_id: Uuid, phone: Option<&str>) -> Patient {
    Patient {
        id: Uuid::new_v4(),
        clinic_id,
        name: "Maria Souza".to_string(),
        phone: phone.map(str::to_string),
    }
}

pub fn doctor_fixture(clinic_id: Uuid) -> Doctor {
    Doctor {
        id: Uuid::new_v4(),
        clinic_id,
        name: "Dra. Helena Costa".to_string(),
        user_id: None,
    }
}

pub fn event_type_fixture(clinic_id: Uuid, title: &str, duration_minutes: i32) -> EventType {
    EventType {
        id: Uuid::new_v4(),
        clinic_id,
        title: title.to_string(),
        duration_minutes,
        active: true,
    }
}

pub fn lead_fixture(clinic_id: Uuid, phone: &str) -> Lead {
    Lead {
        id: Uuid::new_v4(),
        clinic_id,
        name: "Maria Souza".to_string(),
        phone: Some(phone.to_string()),
        status: LeadStatus::New,
        appointment_id: None,
        updated_at: Utc::now(),
    }
}

pub fn appointment_fixture(
    clinic_id: Uuid,
    doctor_id: Uuid,
    patient_id: Uuid,
    start_time: DateTime<Utc>,
    duration_minutes: i32,
) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        clinic_id,
        doctor_id,
        patient_id,
        start_time,
        end_time: start_time + Duration::minutes(duration_minutes as i64),
        duration_minutes,
        status: AppointmentStatus::Scheduled,
        event_type_id: None,
        title: "Consulta".to_string(),
        timezone: "America/Sao_Paulo".to_string(),
        metadata: Map::new(),
        source: "test".to_string(),
        created_at: start_time,
        updated_at: start_time,
    }
}

pub fn connection_fixture(clinic_id: Uuid, doctor_id: Uuid, status: ConnectionStatus) -> ConnectionRecord {
    let now = Utc::now();
    ConnectionRecord {
        id: Uuid::new_v4(),
        clinic_id,
        doctor_id,
        instance_name: format!("clinic-{}", doctor_id.simple()),
        instance_id: Some(format!("inst-{}", doctor_id.simple())),
        status,
        qr_code: None,
        phone_number: None,
        connected_at: None,
        last_sync_at: None,
        created_at: now,
        updated_at: now,
    }
}
