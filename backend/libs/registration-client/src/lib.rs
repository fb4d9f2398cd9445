//! Registration API client
//!
//! Typed client for the alert notifier's registration endpoints, for services
//! that onboard clients and need to bind them to a Telegram chat.
//!
//! # Example
//! ```no_run
//! use registration_client::RegistrationClient;
//!
//! # async fn run() -> Result<(), registration_client::ClientError> {
//! let client = RegistrationClient::new("http://alert-notifier:8080")?;
//! client.create("64b7f0c2e1d3a4b5c6d7e8f9", "-1001234567890").await?;
//! client.delete("64b7f0c2e1d3a4b5c6d7e8f9").await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const REGISTRATIONS_PATH: &str = "api/v1/registrations";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url {0:?}")]
    InvalidBaseUrl(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registration api returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The client already has a registration
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT.as_u16())
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

/// Registration as returned by the API
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Registration {
    pub client_id: String,
    pub destination: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    client_id: &'a str,
    destination: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Clone)]
pub struct RegistrationClient {
    http_client: reqwest::Client,
    registrations: Url,
}

impl RegistrationClient {
    /// Client for the service at `base_url` (scheme, host and port)
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Self::with_http_client(base_url, http_client)
    }

    pub fn with_http_client(
        base_url: &str,
        http_client: reqwest::Client,
    ) -> Result<Self, ClientError> {
        let registrations = Url::parse(&format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            REGISTRATIONS_PATH
        ))
        .ok()
        .filter(|url| !url.cannot_be_a_base())
        .ok_or_else(|| ClientError::InvalidBaseUrl(base_url.to_string()))?;

        Ok(Self {
            http_client,
            registrations,
        })
    }

    /// Bind `client_id` to a Telegram chat id or `@channel` handle
    pub async fn create(&self, client_id: &str, destination: &str) -> Result<(), ClientError> {
        let response = self
            .http_client
            .post(self.registrations.clone())
            .json(&CreateRequest {
                client_id,
                destination,
            })
            .send()
            .await?;

        expect_status(response, StatusCode::CREATED).await?;
        debug!(client_id, "Registration created");
        Ok(())
    }

    pub async fn get(&self, client_id: &str) -> Result<Registration, ClientError> {
        let response = self.http_client.get(self.item_url(client_id)).send().await?;
        let response = expect_status(response, StatusCode::OK).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, client_id: &str) -> Result<(), ClientError> {
        let response = self
            .http_client
            .delete(self.item_url(client_id))
            .send()
            .await?;

        expect_status(response, StatusCode::OK).await?;
        debug!(client_id, "Registration deleted");
        Ok(())
    }

    fn item_url(&self, client_id: &str) -> Url {
        let mut url = self.registrations.clone();
        // Checked in the constructor
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(client_id);
        }
        url
    }
}

async fn expect_status(
    response: reqwest::Response,
    expected: StatusCode,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }

    let text = response.text().await?;
    let (message, code) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.code),
        Err(_) => (text, None),
    };

    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
