//! OpenTelemetry Configuration Library
//!
//! Sets up `tracing` logging for a service and, when enabled, exports spans over
//! OTLP (works with Jaeger, Tempo and other OTLP-compatible backends).
//!
//! The tracer provider is returned to the caller as a [`TelemetryGuard`] rather than
//! installed as a global, and trace-context extraction goes through an explicitly
//! owned [`TraceContextExtractor`].

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{self as sdktrace, RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod propagation;

pub use config::{LogFormat, TracingConfig};
pub use propagation::{HeaderMapExtractor, TraceContextExtractor};

/// Errors raised while installing the tracing pipeline
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to build OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Keeps the tracer provider alive; call [`TelemetryGuard::shutdown`] before exit
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }

    /// Flush pending spans and drop the provider
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to flush spans on shutdown");
                }
            }
        }
    }
}

/// Initialize logging and (optionally) OTLP span export for a service
///
/// # Arguments
/// * `service_name` - Name of the service (e.g., "alert-notifier-service")
/// * `config` - Tracing configuration
///
/// # Example
/// ```no_run
/// use opentelemetry_config::{init_tracing, TracingConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let guard = init_tracing("my-service", &TracingConfig::from_env())
///         .expect("Failed to initialize tracing");
///     // ...
///     guard.shutdown();
/// }
/// ```
pub fn init_tracing(
    service_name: &str,
    config: &TracingConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter)
            .map_err(|e| TelemetryError::Filter(e.to_string()))?,
    };

    let provider = if config.enabled {
        Some(build_provider(service_name, config)?)
    } else {
        None
    };

    let telemetry_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()))
    });

    let (text_layer, json_layer) = match config.log_format {
        LogFormat::Text => (Some(fmt::layer().with_target(true).with_level(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(true))),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(telemetry_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(
        service = service_name,
        exporting = config.enabled,
        sample_rate = config.sample_rate,
        "Tracing initialized"
    );

    Ok(TelemetryGuard { provider })
}

/// Build an OTLP tracer provider (requires a running Tokio runtime)
fn build_provider(
    service_name: &str,
    config: &TracingConfig,
) -> Result<TracerProvider, TelemetryError> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build_span_exporter()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            sdktrace::config()
                .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_guard_is_not_exporting() {
        let guard = TelemetryGuard { provider: None };
        assert!(!guard.is_exporting());
        guard.shutdown();
    }

    #[test]
    fn test_invalid_filter_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = TracingConfig::default().with_default_filter("info,[[[");
        let err = init_tracing("test-service", &config).err();
        assert!(matches!(err, Some(TelemetryError::Filter(_))));
    }
}
