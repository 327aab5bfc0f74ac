use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use messaging_cell::models::GatewayError;
use messaging_cell::services::{EvolutionGatewayClient, MessagingGateway};
use shared_utils::test_utils::TestConfig;

async fn client(server: &MockServer) -> EvolutionGatewayClient {
    let config = TestConfig::with_gateway(&server.uri()).to_app_config();
    EvolutionGatewayClient::new(&config).unwrap()
}

#[tokio::test]
async fn create_instance_returns_inline_pairing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/instance/create"))
        .and(header("apikey", "test-gateway-key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "instance": { "instanceName": "dr-ana", "instanceId": "abc-123", "status": "created" },
            "qrcode": { "base64": "data:image/png;base64,QR", "pairingCode": "ABCD1234" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server).await.create_instance("dr-ana").await.unwrap();
    assert_eq!(created.instance_id, "abc-123");
    assert_eq!(created.pairing.qr_code.as_deref(), Some("data:image/png;base64,QR"));
}

#[tokio::test]
async fn name_in_use_is_reported_as_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/instance/create"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "status": 403,
            "error": "Forbidden",
            "response": { "message": ["This name \"dr-ana\" is already in use."] }
        })))
        .mount(&server)
        .await;

    let result = client(&server).await.create_instance("dr-ana").await;
    assert_matches!(result, Err(GatewayError::AlreadyExists(_)));
}

#[tokio::test]
async fn open_state_pulls_owner_from_instance_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/dr-ana"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instance": { "instanceName": "dr-ana", "state": "open" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/fetchInstances"))
        .and(query_param("instanceName", "dr-ana"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": "dr-ana", "ownerJid": "5511999990000@s.whatsapp.net" }
        ])))
        .mount(&server)
        .await;

    let state = client(&server).await.connection_state("dr-ana").await.unwrap();
    assert_eq!(state.state, "open");
    assert_eq!(state.owner.as_deref(), Some("5511999990000@s.whatsapp.net"));
}

#[tokio::test]
async fn send_text_returns_message_id_and_raw_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message/sendText/dr-ana"))
        .and(body_json(json!({ "number": "5511999990000", "text": "Olá" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "key": { "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": true, "id": "MSG-1" },
            "status": "PENDING"
        })))
        .mount(&server)
        .await;

    let sent = client(&server)
        .await
        .send_text("dr-ana", "5511999990000", "Olá")
        .await
        .unwrap();
    assert_eq!(sent.message_id.as_deref(), Some("MSG-1"));
    assert_eq!(sent.raw["status"], "PENDING");
}

#[tokio::test]
async fn provider_rejection_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/instance/logout/dr-ana"))
        .respond_with(ResponseTemplate::new(404).set_body_string("instance not found"))
        .mount(&server)
        .await;

    let result = client(&server).await.logout("dr-ana").await;
    assert_matches!(result, Err(GatewayError::Rejected { status: 404, .. }));
}
