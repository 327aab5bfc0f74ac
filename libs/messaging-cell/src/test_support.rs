// libs/messaging-cell/src/test_support.rs
//! Scriptable in-process gateway for tests in this and dependent cells.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::models::{
    CreatedInstance, GatewayConnectionState, GatewayError, PairingMaterial, SentMessage,
};
use crate::services::MessagingGateway;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub instance_name: String,
    pub number: String,
    pub text: String,
}

#[derive(Default)]
struct Script {
    state: Option<GatewayConnectionState>,
    instance_exists: bool,
    fail_sends: Option<String>,
    fail_state: bool,
    sent: Vec<SentText>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct RecordingGateway {
    script: Mutex<Script>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn set_state(&self, state: &str, owner: Option<&str>) {
        self.with_script(|s| {
            s.state = Some(GatewayConnectionState {
                state: state.to_string(),
                owner: owner.map(str::to_string),
            })
        });
    }

    pub fn set_unreachable(&self) {
        self.with_script(|s| s.fail_state = true);
    }

    pub fn set_instance_exists(&self) {
        self.with_script(|s| s.instance_exists = true);
    }

    pub fn fail_sends_with(&self, message: &str) {
        self.with_script(|s| s.fail_sends = Some(message.to_string()));
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.with_script(|s| s.sent.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_script(|s| s.calls.clone())
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn create_instance(&self, instance_name: &str) -> Result<CreatedInstance, GatewayError> {
        self.with_script(|s| {
            s.calls.push(format!("create:{}", instance_name));
            if s.instance_exists {
                return Err(GatewayError::AlreadyExists(instance_name.to_string()));
            }
            s.instance_exists = true;
            Ok(CreatedInstance {
                instance_id: format!("id-{}", instance_name),
                pairing: PairingMaterial {
                    qr_code: Some(format!("qr-{}", instance_name)),
                    pairing_code: None,
                },
            })
        })
    }

    async fn fetch_pairing(&self, instance_name: &str) -> Result<PairingMaterial, GatewayError> {
        self.with_script(|s| s.calls.push(format!("pairing:{}", instance_name)));
        Ok(PairingMaterial {
            qr_code: Some(format!("qr-refresh-{}", instance_name)),
            pairing_code: Some("PAIR1234".to_string()),
        })
    }

    async fn connection_state(&self, instance_name: &str) -> Result<GatewayConnectionState, GatewayError> {
        self.with_script(|s| {
            s.calls.push(format!("state:{}", instance_name));
            if s.fail_state {
                return Err(GatewayError::Transport("connection refused".to_string()));
            }
            Ok(s.state.clone().unwrap_or(GatewayConnectionState {
                state: "close".to_string(),
                owner: None,
            }))
        })
    }

    async fn send_text(
        &self,
        instance_name: &str,
        number: &str,
        text: &str,
    ) -> Result<SentMessage, GatewayError> {
        self.with_script(|s| {
            s.calls.push(format!("send:{}", instance_name));
            if let Some(message) = &s.fail_sends {
                return Err(GatewayError::Rejected {
                    status: 400,
                    message: message.clone(),
                });
            }
            s.sent.push(SentText {
                instance_name: instance_name.to_string(),
                number: number.to_string(),
                text: text.to_string(),
            });
            let id = format!("MSG-{}", s.sent.len());
            Ok(SentMessage {
                message_id: Some(id.clone()),
                raw: json!({ "key": { "id": id } }),
            })
        })
    }

    async fn logout(&self, instance_name: &str) -> Result<(), GatewayError> {
        self.with_script(|s| s.calls.push(format!("logout:{}", instance_name)));
        Err(GatewayError::Rejected {
            status: 404,
            message: "instance not logged in".to_string(),
        })
    }

    async fn delete_instance(&self, instance_name: &str) -> Result<(), GatewayError> {
        self.with_script(|s| {
            s.calls.push(format!("delete:{}", instance_name));
            s.instance_exists = false;
        });
        Ok(())
    }
}
