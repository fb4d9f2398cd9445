//! W3C trace-context extraction from message headers
//!
//! Consumers own a [`TraceContextExtractor`] instead of reaching for a
//! process-wide propagator.

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Read-only view over string message headers (Kafka, AMQP, ...)
pub struct HeaderMapExtractor<'a>(pub &'a HashMap<String, String>);

impl Extractor for HeaderMapExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Extracts `traceparent` / `tracestate` into an OpenTelemetry context
pub struct TraceContextExtractor {
    propagator: TraceContextPropagator,
}

impl Default for TraceContextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceContextExtractor {
    pub fn new() -> Self {
        Self {
            propagator: TraceContextPropagator::new(),
        }
    }

    /// Remote parent context carried by `headers`; empty context when absent or invalid
    pub fn extract(&self, headers: &HashMap<String, String>) -> Context {
        self.propagator.extract(&HeaderMapExtractor(headers))
    }

    /// Attach the remote parent found in `headers` to `span`
    pub fn attach(&self, span: &tracing::Span, headers: &HashMap<String, String>) {
        if headers.is_empty() {
            return;
        }
        span.set_parent(self.extract(headers));
    }
}
