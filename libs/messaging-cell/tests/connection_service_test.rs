use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use messaging_cell::models::WebhookEvent;
use messaging_cell::services::ChannelConnectionService;
use messaging_cell::test_support::RecordingGateway;
use shared_database::{ConnectionStore, InMemoryStore};
use shared_models::auth::ClinicContext;
use shared_models::connection::ConnectionStatus;
use shared_utils::test_utils::connection_fixture;

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<RecordingGateway>,
    service: ChannelConnectionService,
    context: ClinicContext,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(RecordingGateway::new());
    let service = ChannelConnectionService::new(store.clone(), gateway.clone());
    Harness {
        store,
        gateway,
        service,
        context: ClinicContext {
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
        },
    }
}

#[tokio::test]
async fn missing_record_reports_disconnected_without_gateway_call() {
    let h = harness();
    let view = h.service.status(h.context, Utc::now()).await.unwrap();

    assert_eq!(view.status, ConnectionStatus::Disconnected);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn open_state_is_written_back_with_phone_and_connected_at() {
    let h = harness();
    let mut record = connection_fixture(h.context.clinic_id, h.context.doctor_id, ConnectionStatus::Connecting);
    record.qr_code = Some("qr".to_string());
    h.store.seed_connection(record.clone()).await;
    h.gateway.set_state("open", Some("5511999990000:3@s.whatsapp.net"));

    let now = Utc::now();
    let view = h.service.status(h.context, now).await.unwrap();

    assert_eq!(view.status, ConnectionStatus::Connected);
    assert_eq!(view.phone_number.as_deref(), Some("5511999990000"));
    assert_eq!(view.qr_code, None);
    assert_eq!(view.connected_at, Some(now));

    let stored = h
        .store
        .find_for_doctor(h.context.clinic_id, h.context.doctor_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn unchanged_state_only_moves_the_heartbeat() {
    let h = harness();
    let connected_at = Utc::now() - Duration::days(2);
    let mut record = connection_fixture(h.context.clinic_id, h.context.doctor_id, ConnectionStatus::Connected);
    record.phone_number = Some("5511999990000".to_string());
    record.connected_at = Some(connected_at);
    h.store.seed_connection(record.clone()).await;
    h.gateway.set_state("open", Some("5511999990000@s.whatsapp.net"));

    let now = Utc::now();
    let view = h.service.status(h.context, now).await.unwrap();

    assert_eq!(view.status, ConnectionStatus::Connected);
    assert_eq!(view.connected_at, Some(connected_at));

    let stored = h
        .store
        .find_for_doctor(h.context.clinic_id, h.context.doctor_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_sync_at, Some(now));
    assert_eq!(stored.updated_at, record.updated_at);
}

#[tokio::test]
async fn unreachable_gateway_serves_cached_status() {
    let h = harness();
    let record = connection_fixture(h.context.clinic_id, h.context.doctor_id, ConnectionStatus::Connected);
    h.store.seed_connection(record).await;
    h.gateway.set_unreachable();

    let view = h.service.status(h.context, Utc::now()).await.unwrap();
    assert_eq!(view.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn connect_upserts_connecting_record_and_reuses_existing_instance() {
    let h = harness();

    let first = h
        .service
        .connect(h.context, Some("dr-ana".to_string()), Utc::now())
        .await
        .unwrap();
    assert_eq!(first.connection.status, ConnectionStatus::Connecting);
    assert_eq!(first.pairing.qr_code.as_deref(), Some("qr-dr-ana"));

    // The instance now exists on the gateway; pairing is fetched separately.
    let second = h
        .service
        .connect(h.context, Some("dr-ana".to_string()), Utc::now())
        .await
        .unwrap();
    assert_eq!(second.pairing.qr_code.as_deref(), Some("qr-refresh-dr-ana"));

    let stored = h
        .store
        .find_for_doctor(h.context.clinic_id, h.context.doctor_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.instance_id.as_deref(), Some("dr-ana"));
    assert_eq!(stored.qr_code.as_deref(), Some("qr-refresh-dr-ana"));
}

#[tokio::test]
async fn disconnect_swallows_gateway_errors_and_clears_instance() {
    let h = harness();
    let mut record = connection_fixture(h.context.clinic_id, h.context.doctor_id, ConnectionStatus::Connected);
    record.qr_code = Some("stale".to_string());
    h.store.seed_connection(record.clone()).await;

    let response = h.service.disconnect(h.context, Utc::now()).await.unwrap();

    assert_eq!(response.connection.status, ConnectionStatus::Disconnected);
    assert_eq!(response.connection.qr_code, None);
    assert_eq!(response.advisories.len(), 1);
    assert_eq!(response.advisories[0].operation, "gateway_logout");

    // With no instance id left, status is served from cache.
    let view = h.service.status(h.context, Utc::now()).await.unwrap();
    assert_eq!(view.status, ConnectionStatus::Disconnected);
    assert!(!h.gateway.calls().iter().any(|c| c.starts_with("state:")));
}

#[tokio::test]
async fn webhook_updates_record_by_instance_name() {
    let h = harness();
    let record = connection_fixture(h.context.clinic_id, h.context.doctor_id, ConnectionStatus::Connecting);
    h.store.seed_connection(record.clone()).await;

    let handled = h
        .service
        .handle_webhook(
            WebhookEvent {
                event: "CONNECTION_UPDATE".to_string(),
                instance: record.instance_name.clone(),
                data: json!({ "state": "open", "wuid": "5511977770000@s.whatsapp.net" }),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(handled);

    let stored = h.store.find_by_instance(&record.instance_name).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Connected);
    assert_eq!(stored.phone_number.as_deref(), Some("5511977770000"));

    let unknown = h
        .service
        .handle_webhook(
            WebhookEvent {
                event: "connection.update".to_string(),
                instance: "nobody".to_string(),
                data: json!({ "state": "open" }),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(!unknown);
}
