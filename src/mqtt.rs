use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::commands::ReplySink;
use crate::config::MqttConfig;
use crate::workflow::{Notifier, Reply};

/// Operators publish intents here
pub const INTENT_TOPIC: &str = "etawatch/intents";
/// Heartbeats with metrics
pub const STATUS_TOPIC: &str = "etawatch/status";

pub fn reply_topic(caller: &str) -> String {
    format!("etawatch/callers/{}/replies", caller)
}

/// Message from an operator front-end to the bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMessage {
    pub caller: String,
    pub intent: String,
    /// Edited document for `submit`
    #[serde(default)]
    pub payload: Option<String>,
    pub request_id: String,
}

/// Message from the bot back to one caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub caller: String,
    /// Absent on unsolicited notices such as "still working"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub timestamp: u64,
}

#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    client_id: String,
}

impl MqttClient {
    /// Create a new MQTT client. A non-empty credential is sent as the broker
    /// password with the client id as user name.
    pub fn new(config: &MqttConfig, credential: &str) -> (Self, EventLoop) {
        let mut mqttoptions = MqttOptions::new(&config.client_id, &config.broker, config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !credential.is_empty() {
            mqttoptions.set_credentials(&config.client_id, credential);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        (
            Self {
                client,
                client_id: config.client_id.clone(),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe(INTENT_TOPIC.to_string(), QoS::AtLeastOnce)
            .await?;
        info!(client_id = %self.client_id, topic = INTENT_TOPIC, "subscribed to MQTT topics");
        Ok(())
    }

    /// Publish one message to a caller's reply topic
    pub async fn publish_reply(&self, message: &ReplyMessage) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_vec(message)?;
        self.client
            .publish(reply_topic(&message.caller), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    pub async fn publish_status(
        &self,
        payload: serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_vec(&payload)?;
        self.client
            .publish(STATUS_TOPIC, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for MqttClient {
    async fn notify(&self, caller: &str, text: &str) {
        let message = ReplyMessage {
            caller: caller.to_string(),
            request_id: None,
            text: text.to_string(),
            document: None,
            timestamp: now_secs(),
        };
        if let Err(e) = self.publish_reply(&message).await {
            warn!(caller = %caller, error = %e, "failed to publish notice");
        }
    }
}

#[async_trait]
impl ReplySink for MqttClient {
    async fn deliver(
        &self,
        caller: &str,
        request_id: &str,
        reply: &Reply,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let message = ReplyMessage {
            caller: caller.to_string(),
            request_id: Some(request_id.to_string()),
            text: reply.text.clone(),
            document: reply.document.clone(),
            timestamp: now_secs(),
        };
        self.publish_reply(&message).await
    }
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Parse an incoming MQTT message as an IntentMessage
pub fn parse_intent(payload: &[u8]) -> Result<IntentMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}
