//! Prometheus metrics for the alert consumer
//!
//! Counters live on a [`Registry`] owned by the consumer and are served in the
//! text exposition format at `GET /metrics`.
use actix_web::{web, HttpResponse};
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metric name prefix for this service
pub const METRICS_NAMESPACE: &str = "alert_notifier";

/// Message and dispatch counters for the alert consumer
#[derive(Clone)]
pub struct ConsumerMetrics {
    /// Messages taken off a partition claim
    pub messages_received_total: IntCounter,
    /// Empty or undecodable payloads
    pub messages_malformed_total: IntCounter,
    /// Events addressed to other notification methods
    pub messages_skipped_total: IntCounter,
    /// Dispatch tasks spawned
    pub dispatches_total: IntCounter,
    /// Notifications accepted by the delivery channel
    pub deliveries_total: IntCounter,
    /// Dispatches that failed to resolve or deliver
    pub delivery_failures_total: IntCounter,
    /// Dispatch tasks currently running
    pub dispatches_in_flight: IntGauge,
}

impl ConsumerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            messages_received_total: IntCounter::new(
                "messages_received_total",
                "Total alert messages received from Kafka",
            )?,
            messages_malformed_total: IntCounter::new(
                "messages_malformed_total",
                "Total alert messages dropped because the payload could not be decoded",
            )?,
            messages_skipped_total: IntCounter::new(
                "messages_skipped_total",
                "Total alert messages addressed to other notification methods",
            )?,
            dispatches_total: IntCounter::new(
                "dispatches_total",
                "Total notification dispatches started",
            )?,
            deliveries_total: IntCounter::new(
                "deliveries_total",
                "Total notifications delivered",
            )?,
            delivery_failures_total: IntCounter::new(
                "delivery_failures_total",
                "Total notification dispatches that failed",
            )?,
            dispatches_in_flight: IntGauge::new(
                "dispatches_in_flight",
                "Notification dispatches currently running",
            )?,
        };

        for metric in [
            Box::new(metrics.messages_received_total.clone()) as Box<dyn Collector>,
            Box::new(metrics.messages_malformed_total.clone()),
            Box::new(metrics.messages_skipped_total.clone()),
            Box::new(metrics.dispatches_total.clone()),
            Box::new(metrics.deliveries_total.clone()),
            Box::new(metrics.delivery_failures_total.clone()),
            Box::new(metrics.dispatches_in_flight.clone()),
        ] {
            registry.register(metric)?;
        }

        Ok(metrics)
    }
}

/// Render every metric on the registry
///
/// GET /metrics
pub async fn serve_metrics(registry: web::Data<Registry>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered_under_namespace() {
        let registry = Registry::new_custom(Some(METRICS_NAMESPACE.to_string()), None).unwrap();
        let metrics = ConsumerMetrics::new(&registry).unwrap();
        metrics.messages_received_total.inc();
        metrics.messages_received_total.inc();
        metrics.messages_skipped_total.inc();

        let families = registry.gather();
        let received = families
            .iter()
            .find(|f| f.get_name() == "alert_notifier_messages_received_total")
            .unwrap();
        assert_eq!(received.get_metric()[0].get_counter().get_value(), 2.0);
        assert_eq!(families.len(), 7);
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        ConsumerMetrics::new(&registry).unwrap();
        assert!(ConsumerMetrics::new(&registry).is_err());
    }
}
