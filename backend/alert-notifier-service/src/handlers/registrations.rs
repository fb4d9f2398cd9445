/// Client registration handlers
use super::StatusResponse;
use crate::error::Result;
use crate::models::Destination;
use crate::services::RegistrationService;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

/// Destinations may be sent as a Telegram chat id number or as text
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DestinationInput {
    ChatId(i64),
    Text(String),
}

impl From<DestinationInput> for Destination {
    fn from(input: DestinationInput) -> Self {
        match input {
            DestinationInput::ChatId(id) => Destination::new(id.to_string()),
            DestinationInput::Text(text) => Destination::new(text),
        }
    }
}

/// Create registration request
#[derive(Debug, Deserialize)]
pub struct CreateRegistrationPayload {
    #[serde(alias = "clientID")]
    pub client_id: String,
    #[serde(alias = "chatID")]
    pub destination: DestinationInput,
}

/// Register a client
///
/// POST /api/v1/registrations
pub async fn create_registration(
    service: web::Data<RegistrationService>,
    req: web::Json<CreateRegistrationPayload>,
) -> Result<HttpResponse> {
    let payload = req.into_inner();
    service
        .register(&payload.client_id, payload.destination.into())
        .await?;

    Ok(HttpResponse::Created().json(StatusResponse::ok()))
}

/// Remove a client's registration
///
/// DELETE /api/v1/registrations/{client_id}
pub async fn delete_registration(
    service: web::Data<RegistrationService>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    service.unregister(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(StatusResponse::ok()))
}

/// Look up a client's registration
///
/// GET /api/v1/registrations/{client_id}
pub async fn get_registration(
    service: web::Data<RegistrationService>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let registration = service.get(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(registration))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/registrations")
            .route("", web::post().to(create_registration))
            .route("/{client_id}", web::get().to(get_registration))
            .route("/{client_id}", web::delete().to(delete_registration)),
    );
}
