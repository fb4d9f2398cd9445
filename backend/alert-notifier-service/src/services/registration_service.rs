/// Registration use cases behind the HTTP front door
use crate::error::{AppError, Result};
use crate::models::{is_valid_client_id, Destination, Registration};
use crate::repository::{RegistrationRepository, RepositoryError};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct RegistrationService {
    repository: Arc<dyn RegistrationRepository>,
}

impl RegistrationService {
    pub fn new(repository: Arc<dyn RegistrationRepository>) -> Self {
        Self { repository }
    }

    pub async fn register(&self, client_id: &str, destination: Destination) -> Result<Registration> {
        if !is_valid_client_id(client_id) {
            return Err(AppError::Validation(format!("invalid client id: {:?}", client_id)));
        }
        if !destination.is_valid() {
            return Err(AppError::Validation(format!(
                "invalid destination: {:?}",
                destination.as_str()
            )));
        }

        let registration = Registration::new(client_id, destination);
        self.repository
            .create(&registration)
            .await
            .map_err(map_repository_error)?;

        info!(client_id = %client_id, "Client registered");
        Ok(registration)
    }

    pub async fn unregister(&self, client_id: &str) -> Result<()> {
        self.repository
            .delete(client_id)
            .await
            .map_err(map_repository_error)?;

        info!(client_id = %client_id, "Client unregistered");
        Ok(())
    }

    pub async fn get(&self, client_id: &str) -> Result<Registration> {
        self.repository
            .find(client_id)
            .await
            .map_err(map_repository_error)?
            .ok_or_else(|| AppError::NotFound(format!("no registration for client {}", client_id)))
    }
}

fn map_repository_error(err: RepositoryError) -> AppError {
    match err {
        RepositoryError::Conflict(id) => {
            AppError::Conflict(format!("registration already exists for client {}", id))
        }
        RepositoryError::NotFound(id) => {
            AppError::NotFound(format!("no registration for client {}", id))
        }
        RepositoryError::InvalidClientId(id) => {
            AppError::Validation(format!("invalid client id: {:?}", id))
        }
        RepositoryError::Database(e) => AppError::Database(e.to_string()),
    }
}
