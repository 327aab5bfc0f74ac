// libs/messaging-cell/src/services/gateway.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{
    CreatedInstance, GatewayConnectionState, GatewayError, PairingMaterial, SentMessage,
};

/// Capabilities the scheduler needs from the WhatsApp gateway. Every call may
/// fail with a transport or provider error.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// `GatewayError::AlreadyExists` means the name is taken and the instance
    /// can be used as is.
    async fn create_instance(&self, instance_name: &str) -> Result<CreatedInstance, GatewayError>;

    async fn fetch_pairing(&self, instance_name: &str) -> Result<PairingMaterial, GatewayError>;

    async fn connection_state(&self, instance_name: &str) -> Result<GatewayConnectionState, GatewayError>;

    async fn send_text(
        &self,
        instance_name: &str,
        number: &str,
        text: &str,
    ) -> Result<SentMessage, GatewayError>;

    async fn logout(&self, instance_name: &str) -> Result<(), GatewayError>;

    async fn delete_instance(&self, instance_name: &str) -> Result<(), GatewayError>;
}

/// Client for an Evolution-style REST gateway authenticated with an `apikey`
/// header.
pub struct EvolutionGatewayClient {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_url: Option<String>,
}

impl EvolutionGatewayClient {
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        if !config.is_messaging_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.messaging_gateway_url.trim_end_matches('/').to_string(),
            api_key: config.messaging_gateway_api_key.clone(),
            webhook_url: Some(config.messaging_webhook_url.clone()).filter(|url| !url.is_empty()),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Gateway {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .header("apikey", &self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("Gateway call {} failed: {} - {}", path, status, text);
            return Err(rejection(status, &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| GatewayError::Transport(format!("Failed to parse gateway response: {}", e)))
    }

    fn instance_path(action: &str, instance_name: &str) -> String {
        format!("/{}/{}", action, urlencoding::encode(instance_name))
    }

    /// Looks up the owner identity via the instance listing; absence is not an error.
    async fn fetch_owner(&self, instance_name: &str) -> Option<String> {
        let path = format!(
            "/instance/fetchInstances?instanceName={}",
            urlencoding::encode(instance_name)
        );
        match self.call(Method::GET, &path, None).await {
            Ok(Value::Array(instances)) => instances.iter().find_map(owner_identity),
            Ok(other) => owner_identity(&other),
            Err(e) => {
                debug!("Could not fetch owner for {}: {}", instance_name, e);
                None
            }
        }
    }
}

fn rejection(status: StatusCode, body: &str) -> GatewayError {
    let lowered = body.to_lowercase();
    if lowered.contains("already in use") || lowered.contains("already exists") {
        return GatewayError::AlreadyExists(body.to_string());
    }
    GatewayError::Rejected {
        status: status.as_u16(),
        message: body.to_string(),
    }
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Gateway versions disagree on where the owner lives.
pub(crate) fn owner_identity(value: &Value) -> Option<String> {
    [
        "/ownerJid",
        "/owner",
        "/instance/owner",
        "/wuid",
        "/instance/wuid",
        "/number",
    ]
    .iter()
    .find_map(|pointer| string_at(value, pointer))
}

pub(crate) fn pairing_from(value: &Value) -> PairingMaterial {
    PairingMaterial {
        qr_code: string_at(value, "/qrcode/base64")
            .or_else(|| string_at(value, "/base64"))
            .or_else(|| string_at(value, "/qrcode/code"))
            .or_else(|| string_at(value, "/code")),
        pairing_code: string_at(value, "/qrcode/pairingCode").or_else(|| string_at(value, "/pairingCode")),
    }
}

#[async_trait]
impl MessagingGateway for EvolutionGatewayClient {
    async fn create_instance(&self, instance_name: &str) -> Result<CreatedInstance, GatewayError> {
        info!("Creating gateway instance {}", instance_name);

        let mut body = json!({
            "instanceName": instance_name,
            "qrcode": true,
            "integration": "WHATSAPP-BAILEYS",
        });
        if let Some(url) = &self.webhook_url {
            body["webhook"] = json!({
                "url": url,
                "events": ["CONNECTION_UPDATE", "QRCODE_UPDATED"],
            });
        }

        let response = self.call(Method::POST, "/instance/create", Some(body)).await?;
        let instance_id = string_at(&response, "/instance/instanceId")
            .or_else(|| string_at(&response, "/hash"))
            .unwrap_or_else(|| instance_name.to_string());

        Ok(CreatedInstance {
            instance_id,
            pairing: pairing_from(&response),
        })
    }

    async fn fetch_pairing(&self, instance_name: &str) -> Result<PairingMaterial, GatewayError> {
        let response = self
            .call(Method::GET, &Self::instance_path("instance/connect", instance_name), None)
            .await?;
        Ok(pairing_from(&response))
    }

    async fn connection_state(&self, instance_name: &str) -> Result<GatewayConnectionState, GatewayError> {
        let response = self
            .call(
                Method::GET,
                &Self::instance_path("instance/connectionState", instance_name),
                None,
            )
            .await?;

        let state = string_at(&response, "/instance/state")
            .or_else(|| string_at(&response, "/state"))
            .unwrap_or_else(|| "unknown".to_string());

        let mut owner = owner_identity(&response);
        if owner.is_none() && state == "open" {
            owner = self.fetch_owner(instance_name).await;
        }

        Ok(GatewayConnectionState { state, owner })
    }

    async fn send_text(
        &self,
        instance_name: &str,
        number: &str,
        text: &str,
    ) -> Result<SentMessage, GatewayError> {
        let response = self
            .call(
                Method::POST,
                &Self::instance_path("message/sendText", instance_name),
                Some(json!({ "number": number, "text": text })),
            )
            .await?;

        Ok(SentMessage {
            message_id: string_at(&response, "/key/id"),
            raw: response,
        })
    }

    async fn logout(&self, instance_name: &str) -> Result<(), GatewayError> {
        self.call(Method::DELETE, &Self::instance_path("instance/logout", instance_name), None)
            .await
            .map(|_| ())
    }

    async fn delete_instance(&self, instance_name: &str) -> Result<(), GatewayError> {
        self.call(Method::DELETE, &Self::instance_path("instance/delete", instance_name), None)
            .await
            .map(|_| ())
    }
}

/// Stand-in used when no gateway is configured; every call fails cleanly so
/// reads fall back to cached state and sends are recorded as failures.
pub struct UnconfiguredGateway;

#[async_trait]
impl MessagingGateway for UnconfiguredGateway {
    async fn create_instance(&self, _instance_name: &str) -> Result<CreatedInstance, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn fetch_pairing(&self, _instance_name: &str) -> Result<PairingMaterial, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn connection_state(&self, _instance_name: &str) -> Result<GatewayConnectionState, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn send_text(&self, _: &str, _: &str, _: &str) -> Result<SentMessage, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn logout(&self, _instance_name: &str) -> Result<(), GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn delete_instance(&self, _instance_name: &str) -> Result<(), GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_found_across_gateway_versions() {
        assert_eq!(
            owner_identity(&json!({ "ownerJid": "5511999990000@s.whatsapp.net" })),
            Some("5511999990000@s.whatsapp.net".to_string())
        );
        assert_eq!(
            owner_identity(&json!({ "instance": { "owner": "5511888880000@s.whatsapp.net" } })),
            Some("5511888880000@s.whatsapp.net".to_string())
        );
        assert_eq!(owner_identity(&json!({ "ownerJid": "" })), None);
    }

    #[test]
    fn pairing_prefers_inline_qr() {
        let pairing = pairing_from(&json!({
            "qrcode": { "base64": "data:image/png;base64,AAA", "pairingCode": "WZYEH1YY" }
        }));
        assert_eq!(pairing.qr_code.as_deref(), Some("data:image/png;base64,AAA"));
        assert_eq!(pairing.pairing_code.as_deref(), Some("WZYEH1YY"));
        assert!(pairing_from(&json!({})).is_empty());
    }

    #[test]
    fn already_in_use_is_recognised() {
        let err = rejection(
            StatusCode::FORBIDDEN,
            r#"{"status":403,"response":{"message":["This name \"clinic\" is already in use."]}}"#,
        );
        assert!(matches!(err, GatewayError::AlreadyExists(_)));

        let err = rejection(StatusCode::BAD_REQUEST, "bad number");
        assert!(matches!(err, GatewayError::Rejected { status: 400, .. }));
    }

    #[test]
    fn client_requires_configuration() {
        assert!(matches!(
            EvolutionGatewayClient::new(&AppConfig::default()),
            Err(GatewayError::NotConfigured)
        ));
    }
}
