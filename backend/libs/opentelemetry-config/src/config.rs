//! Tracing configuration structures

use serde::{Deserialize, Serialize};

/// Output format of the `fmt` log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Configuration for logging and distributed tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Export spans over OTLP (logging is always on)
    pub enabled: bool,

    /// OTLP collector endpoint
    /// Example: "http://jaeger:4317" (Jaeger with OTLP support)
    pub otlp_endpoint: String,

    /// Sample rate (0.0 to 1.0)
    pub sample_rate: f64,

    /// Service version reported on the resource
    pub service_version: String,

    /// Deployment environment (development, staging, production)
    pub environment: String,

    /// Log line format
    pub log_format: LogFormat,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            sample_rate: 0.1,
            service_version: "dev".to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Text,
            default_filter: "info".to_string(),
        }
    }
}

impl TracingConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TRACING_ENABLED`: Enable span export (true/false)
    /// - `OTLP_ENDPOINT`: OTLP collector endpoint
    /// - `TRACING_SAMPLE_RATE`: Sample rate (0.0-1.0)
    /// - `SERVICE_VERSION`: Service version
    /// - `APP_ENV`: Environment (development/staging/production)
    /// - `LOG_FORMAT`: `text` or `json`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("TRACING_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.enabled);

        let otlp_endpoint = std::env::var("OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint);

        let sample_rate = std::env::var("TRACING_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults.sample_rate)
            .clamp(0.0, 1.0);

        let service_version =
            std::env::var("SERVICE_VERSION").unwrap_or(defaults.service_version);

        let environment = std::env::var("APP_ENV").unwrap_or(defaults.environment);

        let log_format = std::env::var("LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or(defaults.log_format);

        Self {
            enabled,
            otlp_endpoint,
            sample_rate,
            service_version,
            environment,
            log_format,
            default_filter: defaults.default_filter,
        }
    }

    /// Replace the fallback filter directive
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}
