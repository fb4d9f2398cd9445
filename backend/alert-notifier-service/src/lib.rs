//! Alert notifier service
//!
//! Consumes alert events from Kafka and delivers Telegram notifications to the
//! destination registered for each client. Registrations are managed over a
//! small HTTP API.

pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;

pub use config::{Config, RegistrationStore};
pub use consumers::{
    AckMode, AlertConsumerConfig, AlertEventsConsumer, ConsumerError, ConsumerState,
    KafkaConsumerGroup,
};
pub use error::{AppError, Result};
pub use models::{AlertEvent, Destination, Registration};
pub use services::{NotificationDispatcher, RegistrationService, TelegramSender};
