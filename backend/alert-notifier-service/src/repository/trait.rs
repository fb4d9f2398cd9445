use crate::models::{is_valid_client_id, Destination, Registration};
use crate::services::{DestinationResolver, ResolveError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Registration store errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A registration already exists for the client id
    #[error("registration already exists for client {0}")]
    Conflict(String),

    #[error("no registration for client {0}")]
    NotFound(String),

    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Trait defining the registration store used by the API and the resolver.
/// Both PostgresRegistrationRepository and InMemoryRegistrationRepository implement this.
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    /// Insert a new registration; `Conflict` if the client id is taken
    async fn create(&self, registration: &Registration) -> Result<(), RepositoryError>;

    /// Remove a registration; `NotFound` if there was none
    async fn delete(&self, client_id: &str) -> Result<(), RepositoryError>;

    async fn find(&self, client_id: &str) -> Result<Option<Registration>, RepositoryError>;
}

pub(crate) fn ensure_valid_client_id(client_id: &str) -> Result<(), RepositoryError> {
    if is_valid_client_id(client_id) {
        Ok(())
    } else {
        Err(RepositoryError::InvalidClientId(client_id.to_string()))
    }
}

/// Resolves destinations by reading the registration store
#[derive(Clone)]
pub struct RegistrationResolver {
    repository: Arc<dyn RegistrationRepository>,
}

impl RegistrationResolver {
    pub fn new(repository: Arc<dyn RegistrationRepository>) -> Self {
        Self { repository }
    }
}

impl From<RepositoryError> for ResolveError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => ResolveError::NotFound(id),
            RepositoryError::InvalidClientId(id) => ResolveError::InvalidClientId(id),
            other => ResolveError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
impl DestinationResolver for RegistrationResolver {
    async fn get_destination(&self, client_id: &str) -> Result<Destination, ResolveError> {
        ensure_valid_client_id(client_id)?;

        self.repository
            .find(client_id)
            .await?
            .map(|registration| registration.destination)
            .ok_or_else(|| ResolveError::NotFound(client_id.to_string()))
    }
}
