use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use chrono_tz::Tz;
use tracing::warn;
use uuid::Uuid;

/// Which store implementation backs the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBackend {
    Supabase,
    Memory,
}

/// Working-calendar constants consulted by the availability engine and the
/// event-type resolver.
#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    pub clinic_timezone: Tz,
    pub workday_start: NaiveTime,
    pub workday_end: NaiveTime,
    pub slot_step_minutes: i64,
    pub default_duration_minutes: i32,
    pub default_label: String,
    /// Longest appointment we expect to see; widens the busy-set prefilter.
    pub max_appointment_minutes: i64,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            clinic_timezone: chrono_tz::America::Sao_Paulo,
            workday_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            workday_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_step_minutes: 15,
            default_duration_minutes: 30,
            default_label: "Consulta".to_string(),
            max_appointment_minutes: 480,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub batch_limit: usize,
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    pub claim_ttl_secs: i64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            concurrency: 4,
            poll_interval_secs: 60,
            claim_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: String,
    pub supabase_jwt_secret: String,
    pub data_backend: DataBackend,
    pub messaging_gateway_url: String,
    pub messaging_gateway_api_key: String,
    pub messaging_webhook_url: String,
    pub gateway_timeout_secs: u64,
    pub default_clinic_id: Option<Uuid>,
    pub default_doctor_id: Option<Uuid>,
    pub port: u16,
    pub scheduling: SchedulingSettings,
    pub dispatch: DispatchSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_key: String::new(),
            supabase_jwt_secret: String::new(),
            data_backend: DataBackend::Memory,
            messaging_gateway_url: String::new(),
            messaging_gateway_api_key: String::new(),
            messaging_webhook_url: String::new(),
            gateway_timeout_secs: 15,
            default_clinic_id: None,
            default_doctor_id: None,
            port: 3000,
            scheduling: SchedulingSettings::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let scheduling_defaults = SchedulingSettings::default();
        let dispatch_defaults = DispatchSettings::default();

        let mut config = Self {
            supabase_url: string_var("SUPABASE_URL"),
            supabase_anon_key: string_var("SUPABASE_ANON_PUBLIC_KEY"),
            supabase_service_key: string_var("SUPABASE_SERVICE_ROLE_KEY"),
            supabase_jwt_secret: string_var("SUPABASE_JWT_SECRET"),
            data_backend: DataBackend::Supabase,
            messaging_gateway_url: string_var("MESSAGING_GATEWAY_URL"),
            messaging_gateway_api_key: string_var("MESSAGING_GATEWAY_API_KEY"),
            messaging_webhook_url: string_var("MESSAGING_WEBHOOK_URL"),
            gateway_timeout_secs: parsed_var("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs),
            default_clinic_id: optional_var("DEFAULT_CLINIC_ID"),
            default_doctor_id: optional_var("DEFAULT_DOCTOR_ID"),
            port: parsed_var("PORT", defaults.port),
            scheduling: SchedulingSettings {
                clinic_timezone: parsed_var("CLINIC_TIMEZONE", scheduling_defaults.clinic_timezone),
                workday_start: time_var("WORKDAY_START", scheduling_defaults.workday_start),
                workday_end: time_var("WORKDAY_END", scheduling_defaults.workday_end),
                slot_step_minutes: parsed_var("SLOT_STEP_MINUTES", scheduling_defaults.slot_step_minutes),
                default_duration_minutes: parsed_var(
                    "DEFAULT_APPOINTMENT_MINUTES",
                    scheduling_defaults.default_duration_minutes,
                ),
                default_label: env::var("DEFAULT_APPOINTMENT_LABEL")
                    .unwrap_or(scheduling_defaults.default_label),
                max_appointment_minutes: parsed_var(
                    "MAX_APPOINTMENT_MINUTES",
                    scheduling_defaults.max_appointment_minutes,
                ),
            },
            dispatch: DispatchSettings {
                batch_limit: parsed_var("DISPATCH_BATCH_LIMIT", dispatch_defaults.batch_limit),
                concurrency: parsed_var("DISPATCH_CONCURRENCY", dispatch_defaults.concurrency),
                poll_interval_secs: parsed_var(
                    "DISPATCH_POLL_INTERVAL_SECS",
                    dispatch_defaults.poll_interval_secs,
                ),
                claim_ttl_secs: parsed_var("DISPATCH_CLAIM_TTL_SECS", dispatch_defaults.claim_ttl_secs),
            },
        };

        config.data_backend = match env::var("DATA_BACKEND").ok().as_deref() {
            Some("memory") => DataBackend::Memory,
            Some("supabase") => DataBackend::Supabase,
            Some(other) => {
                warn!("Unknown DATA_BACKEND '{}', choosing from Supabase configuration", other);
                config.inferred_backend()
            }
            None => config.inferred_backend(),
        };

        if config.scheduling.workday_start >= config.scheduling.workday_end {
            warn!("WORKDAY_START is not before WORKDAY_END, using defaults");
            config.scheduling.workday_start = scheduling_defaults.workday_start;
            config.scheduling.workday_end = scheduling_defaults.workday_end;
        }
        if config.scheduling.slot_step_minutes <= 0 {
            warn!("SLOT_STEP_MINUTES must be positive, using default");
            config.scheduling.slot_step_minutes = scheduling_defaults.slot_step_minutes;
        }

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.is_messaging_configured() {
            warn!("Messaging gateway not configured - notifications cannot be delivered");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_service_key.is_empty()
    }

    pub fn is_messaging_configured(&self) -> bool {
        !self.messaging_gateway_url.is_empty() && !self.messaging_gateway_api_key.is_empty()
    }

    fn inferred_backend(&self) -> DataBackend {
        if self.is_configured() {
            DataBackend::Supabase
        } else {
            warn!("Supabase not configured, falling back to the in-memory store");
            DataBackend::Memory
        }
    }
}

fn string_var(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", key);
        String::new()
    })
}

fn optional_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} has an invalid value '{}', ignoring it", key, raw);
            None
        }
    }
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn time_var(key: &str, default: NaiveTime) -> NaiveTime {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(&raw, "%H:%M").unwrap_or_else(|_| {
            warn!("{} must look like HH:MM, got '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
