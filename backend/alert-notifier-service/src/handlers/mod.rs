pub mod registrations;

use crate::metrics;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;

/// Body returned by mutating endpoints
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(json!({"message": "pong"}))
}

/// Register all HTTP routes
///
/// `/metrics` expects the consumer's `prometheus::Registry` as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/ping", web::get().to(ping))
        .route("/metrics", web::get().to(metrics::serve_metrics));
    registrations::register_routes(cfg);
}
