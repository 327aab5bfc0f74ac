// libs/appointment-cell/src/services/event_type.rs
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use shared_config::SchedulingSettings;
use shared_database::EventTypeStore;
use shared_models::appointment::EventType;

use crate::models::{AppointmentError, ResolvedDuration};

pub struct EventTypeResolver {
    event_types: Arc<dyn EventTypeStore>,
    default_minutes: i32,
    default_label: String,
    max_minutes: i64,
}

impl EventTypeResolver {
    pub fn new(event_types: Arc<dyn EventTypeStore>, settings: &SchedulingSettings) -> Self {
        Self {
            event_types,
            default_minutes: settings.default_duration_minutes,
            default_label: settings.default_label.clone(),
            max_minutes: settings.max_appointment_minutes,
        }
    }

    /// Event type beats an explicit duration, which beats the default.
    /// An unknown or inactive event type falls through to the next tier, as
    /// does one longer than the maximum appointment length. Busy-set lookups
    /// only reach back that far, so no booking may exceed it.
    pub async fn resolve(
        &self,
        clinic_id: Uuid,
        event_type_id: Option<Uuid>,
        requested_minutes: Option<i32>,
    ) -> Result<ResolvedDuration, AppointmentError> {
        if let Some(id) = event_type_id {
            match self.event_types.find(clinic_id, id).await? {
                Some(event_type)
                    if event_type.active && self.within_limit(event_type.duration_minutes) =>
                {
                    return Ok(ResolvedDuration {
                        minutes: event_type.duration_minutes,
                        label: event_type.title,
                        event_type_id: Some(event_type.id),
                    });
                }
                _ => debug!("Event type {} not usable, falling back", id),
            }
        }

        if let Some(minutes) = requested_minutes {
            if minutes <= 0 {
                return Err(AppointmentError::ValidationError(format!(
                    "duration_minutes must be positive, got {}",
                    minutes
                )));
            }
            if !self.within_limit(minutes) {
                return Err(AppointmentError::ValidationError(format!(
                    "duration_minutes must be at most {}, got {}",
                    self.max_minutes, minutes
                )));
            }
            return Ok(ResolvedDuration {
                minutes,
                label: self.default_label.clone(),
                event_type_id: None,
            });
        }

        Ok(ResolvedDuration {
            minutes: self.default_minutes,
            label: self.default_label.clone(),
            event_type_id: None,
        })
    }

    fn within_limit(&self, minutes: i32) -> bool {
        minutes > 0 && i64::from(minutes) <= self.max_minutes
    }

    pub async fn list_active(&self, clinic_id: Uuid) -> Result<Vec<EventType>, AppointmentError> {
        Ok(self.event_types.list_active(clinic_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_database::InMemoryStore;
    use shared_utils::test_utils::event_type_fixture;

    async fn resolver_with(event_type: Option<EventType>) -> EventTypeResolver {
        let store = Arc::new(InMemoryStore::new());
        if let Some(event_type) = event_type {
            store.seed_event_type(event_type).await;
        }
        EventTypeResolver::new(store, &SchedulingSettings::default())
    }

    #[tokio::test]
    async fn event_type_overrides_requested_duration() {
        let clinic = Uuid::new_v4();
        let retorno = event_type_fixture(clinic, "Retorno", 15);
        let resolver = resolver_with(Some(retorno.clone())).await;

        let resolved = resolver.resolve(clinic, Some(retorno.id), Some(60)).await.unwrap();
        assert_eq!(
            resolved,
            ResolvedDuration {
                minutes: 15,
                label: "Retorno".to_string(),
                event_type_id: Some(retorno.id),
            }
        );
    }

    #[tokio::test]
    async fn unknown_event_type_falls_through() {
        let clinic = Uuid::new_v4();
        let resolver = resolver_with(None).await;

        let requested = resolver.resolve(clinic, Some(Uuid::new_v4()), Some(45)).await.unwrap();
        assert_eq!(requested.minutes, 45);
        assert_eq!(requested.event_type_id, None);

        let default = resolver.resolve(clinic, Some(Uuid::new_v4()), None).await.unwrap();
        assert_eq!(default.minutes, 30);
        assert_eq!(default.label, "Consulta");
    }

    #[tokio::test]
    async fn inactive_or_foreign_event_type_is_ignored() {
        let clinic = Uuid::new_v4();
        let mut inactive = event_type_fixture(clinic, "Antigo", 90);
        inactive.active = false;
        let resolver = resolver_with(Some(inactive.clone())).await;

        assert_eq!(resolver.resolve(clinic, Some(inactive.id), None).await.unwrap().minutes, 30);
        assert_eq!(
            resolver.resolve(Uuid::new_v4(), Some(inactive.id), None).await.unwrap().minutes,
            30
        );
    }

    #[tokio::test]
    async fn non_positive_duration_is_rejected() {
        let resolver = resolver_with(None).await;
        let result = resolver.resolve(Uuid::new_v4(), None, Some(0)).await;
        assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    }

    #[tokio::test]
    async fn duration_over_the_maximum_is_rejected() {
        let resolver = resolver_with(None).await;

        assert_eq!(resolver.resolve(Uuid::new_v4(), None, Some(480)).await.unwrap().minutes, 480);
        let result = resolver.resolve(Uuid::new_v4(), None, Some(720)).await;
        assert_matches!(result, Err(AppointmentError::ValidationError(msg)) if msg.contains("480"));
    }

    #[tokio::test]
    async fn overlong_event_type_falls_through() {
        let clinic = Uuid::new_v4();
        let plantao = event_type_fixture(clinic, "Plantão", 720);
        let resolver = resolver_with(Some(plantao.clone())).await;

        let resolved = resolver.resolve(clinic, Some(plantao.id), Some(60)).await.unwrap();
        assert_eq!(resolved.minutes, 60);
        assert_eq!(resolved.event_type_id, None);
    }
}
