/// Telegram Bot API delivery
///
/// Sends alert notifications with `sendMessage`. The bot token is part of the
/// URL path, so it is never logged.
use crate::models::{AlertEvent, Destination};
use crate::services::notification_dispatcher::{DeliveryError, DeliverySender};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Telegram client configuration
#[derive(Clone)]
pub struct TelegramSenderConfig {
    pub bot_token: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl TelegramSenderConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: "https://api.telegram.org".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Subset of the Bot API response envelope we care about
#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramSender {
    http_client: reqwest::Client,
    endpoint: String,
}

impl TelegramSender {
    pub fn new(config: TelegramSenderConfig) -> Result<Self, String> {
        if config.bot_token.trim().is_empty() {
            return Err("Telegram bot token is empty".to_string());
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        let endpoint = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.bot_token.trim()
        );

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// Human-readable notification text for an alert
    pub fn format_message(event: &AlertEvent) -> String {
        format!(
            "Attention!\nThe system has been triggered for message from {}\nMessage type: {}\nRequest: {}",
            event.timestamp.to_rfc3339(),
            event.message_type,
            event.request_id
        )
    }
}

/// Numeric chat ids go out as numbers, `@channel` handles as strings
fn chat_id_value(destination: &Destination) -> serde_json::Value {
    match destination.as_str().parse::<i64>() {
        Ok(id) => json!(id),
        Err(_) => json!(destination.as_str()),
    }
}

#[async_trait]
impl DeliverySender for TelegramSender {
    async fn send(
        &self,
        destination: &Destination,
        event: &AlertEvent,
    ) -> Result<(), DeliveryError> {
        let body = json!({
            "chat_id": chat_id_value(destination),
            "text": Self::format_message(event),
            "disable_web_page_preview": true,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        let parsed: Option<TelegramApiResponse> = serde_json::from_str(&text).ok();

        match parsed {
            Some(api) if status.is_success() && api.ok => {
                debug!(destination = %destination, "Telegram message sent");
                Ok(())
            }
            Some(api) => {
                let description = api
                    .description
                    .unwrap_or_else(|| "no description".to_string());
                warn!(
                    destination = %destination,
                    status = status.as_u16(),
                    description = %description,
                    "Telegram rejected message"
                );
                Err(DeliveryError::Rejected {
                    status: status.as_u16(),
                    description,
                })
            }
            None if !status.is_success() => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: text,
            }),
            None => Err(DeliveryError::InvalidResponse(format!(
                "unparseable body with status {}",
                status
            ))),
        }
    }
}
