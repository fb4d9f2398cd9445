//! Configuration for alert-notifier-service
use crate::consumers::{AckMode, AlertConsumerConfig, KafkaGroupConfig};
use crate::models::TELEGRAM_METHOD;
use crate::services::TelegramSenderConfig;
use serde::Deserialize;
use std::time::Duration;

/// Where client registrations are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStore {
    Postgres,
    /// Process-local; registrations are lost on restart
    Memory,
}

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Comma-separated Kafka bootstrap servers
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,

    /// Comma-separated topics carrying alert events
    #[serde(default = "default_kafka_topics")]
    pub kafka_topics: String,

    #[serde(default = "default_session_timeout_ms")]
    pub kafka_session_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub kafka_heartbeat_interval_ms: u64,

    #[serde(default = "default_max_poll_interval_ms")]
    pub kafka_max_poll_interval_ms: u64,

    /// Notification method this instance serves
    #[serde(default = "default_notification_method")]
    pub notification_method: String,

    /// `after_dispatch` or `on_receipt`
    #[serde(default = "default_ack_mode")]
    pub ack_mode: String,

    /// 0 = unbounded
    #[serde(default)]
    pub max_in_flight_dispatches: usize,

    /// Time allowed for leaving the group and draining dispatches on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    pub telegram_bot_token: String,

    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,

    #[serde(default = "default_telegram_timeout_ms")]
    pub telegram_timeout_ms: u64,

    #[serde(default = "default_registration_store")]
    pub registration_store: RegistrationStore,

    /// Required when `registration_store` is `postgres`
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_kafka_group_id() -> String {
    "alert-notifier".to_string()
}

fn default_kafka_topics() -> String {
    "alerts".to_string()
}

fn default_session_timeout_ms() -> u64 {
    20_000
}

fn default_heartbeat_interval_ms() -> u64 {
    6_000
}

fn default_max_poll_interval_ms() -> u64 {
    300_000
}

fn default_notification_method() -> String {
    TELEGRAM_METHOD.to_string()
}

fn default_ack_mode() -> String {
    "after_dispatch".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout_ms() -> u64 {
    5_000
}

fn default_registration_store() -> RegistrationStore {
    RegistrationStore::Postgres
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Topics to subscribe to, trimmed, empty entries dropped
    pub fn kafka_topic_list(&self) -> Vec<String> {
        self.kafka_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn ack_mode(&self) -> Result<AckMode, String> {
        self.ack_mode.parse()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Database URL, checked against the selected registration store
    pub fn database_url(&self) -> Result<&str, String> {
        match self.database_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err("DATABASE_URL is required when REGISTRATION_STORE=postgres".to_string()),
        }
    }

    /// Cross-field checks envy cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.kafka_topic_list().is_empty() {
            return Err("KAFKA_TOPICS must name at least one topic".to_string());
        }
        if self.notification_method.trim().is_empty() {
            return Err("NOTIFICATION_METHOD must not be empty".to_string());
        }
        self.ack_mode()?;
        if self.registration_store == RegistrationStore::Postgres {
            self.database_url()?;
        }
        Ok(())
    }

    pub fn kafka_group_config(&self) -> KafkaGroupConfig {
        KafkaGroupConfig {
            brokers: self.kafka_brokers.clone(),
            group_id: self.kafka_group_id.clone(),
            session_timeout_ms: self.kafka_session_timeout_ms,
            heartbeat_interval_ms: self.kafka_heartbeat_interval_ms,
            max_poll_interval_ms: self.kafka_max_poll_interval_ms,
            ..KafkaGroupConfig::default()
        }
    }

    pub fn alert_consumer_config(&self) -> Result<AlertConsumerConfig, String> {
        Ok(AlertConsumerConfig {
            topics: self.kafka_topic_list(),
            notification_method: self.notification_method.trim().to_string(),
            ack_mode: self.ack_mode()?,
            max_in_flight_dispatches: self.max_in_flight_dispatches,
            shutdown_grace: self.shutdown_grace(),
        })
    }

    pub fn telegram_sender_config(&self) -> TelegramSenderConfig {
        TelegramSenderConfig {
            bot_token: self.telegram_bot_token.clone(),
            api_base: self.telegram_api_base.clone(),
            request_timeout: Duration::from_millis(self.telegram_timeout_ms),
        }
    }
}
