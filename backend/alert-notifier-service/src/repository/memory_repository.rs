use super::r#trait::{ensure_valid_client_id, RegistrationRepository, RepositoryError};
use crate::models::Registration;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Process-local registration store, used by tests and `REGISTRATION_STORE=memory`
#[derive(Default)]
pub struct InMemoryRegistrationRepository {
    registrations: DashMap<String, Registration>,
}

impl InMemoryRegistrationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[async_trait]
impl RegistrationRepository for InMemoryRegistrationRepository {
    async fn create(&self, registration: &Registration) -> Result<(), RepositoryError> {
        ensure_valid_client_id(&registration.client_id)?;

        match self.registrations.entry(registration.client_id.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(registration.client_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(registration.clone());
                Ok(())
            }
        }
    }

    async fn delete(&self, client_id: &str) -> Result<(), RepositoryError> {
        ensure_valid_client_id(client_id)?;

        self.registrations
            .remove(client_id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(client_id.to_string()))
    }

    async fn find(&self, client_id: &str) -> Result<Option<Registration>, RepositoryError> {
        ensure_valid_client_id(client_id)?;
        Ok(self.registrations.get(client_id).map(|r| r.value().clone()))
    }
}
