use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Notification method tag for Telegram delivery
pub const TELEGRAM_METHOD: &str = "telegram";

/// Longest client identifier accepted by the registration store
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Alert published by the detection pipeline, one per Kafka message
///
/// Wire format:
/// ```json
/// {
///   "notificationMethods": ["telegram"],
///   "ts": "2024-01-01T00:00:00Z",
///   "requestID": "7d8b1c1e-5a0e-4a43-9d0c-55b6b1b1c0de",
///   "clientID": "abc123",
///   "messageType": "audio"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Channels this alert is meant for (e.g. "telegram")
    #[serde(
        rename = "notificationMethods",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub notification_methods: Vec<String>,

    /// When the triggering condition was detected
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Correlation id assigned upstream
    #[serde(rename = "requestID")]
    pub request_id: Uuid,

    #[serde(rename = "clientID")]
    pub client_id: String,

    /// Nature of the triggering payload ("audio", "photo", "text")
    #[serde(rename = "messageType")]
    pub message_type: String,
}

impl AlertEvent {
    /// Decode a Kafka payload
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Whether the event asks for delivery over `method`
    pub fn targets(&self, method: &str) -> bool {
        self.notification_methods.iter().any(|m| m == method)
    }
}

/// `null` decodes to an empty list, same as a missing field
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Delivery address on the messaging channel (Telegram chat id or `@channel`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Telegram accepts numeric chat ids or `@username` handles
    pub fn is_valid(&self) -> bool {
        let value = self.0.trim();
        if value.is_empty() || value.len() != self.0.len() {
            return false;
        }
        match value.strip_prefix('@') {
            Some(handle) => {
                !handle.is_empty()
                    && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => value.parse::<i64>().is_ok(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stored mapping from client identifier to destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Registration {
    pub client_id: String,
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
}

impl Registration {
    pub fn new(client_id: impl Into<String>, destination: Destination) -> Self {
        Self {
            client_id: client_id.into(),
            destination,
            created_at: Utc::now(),
        }
    }
}

/// Client ids are opaque but must be non-empty, bounded and free of whitespace
pub fn is_valid_client_id(client_id: &str) -> bool {
    !client_id.is_empty()
        && client_id.len() <= MAX_CLIENT_ID_LEN
        && !client_id.chars().any(|c| c.is_whitespace() || c.is_control())
}
