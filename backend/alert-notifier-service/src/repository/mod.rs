mod memory_repository;
mod postgres_repository;
mod r#trait;

pub use memory_repository::InMemoryRegistrationRepository;
pub use postgres_repository::PostgresRegistrationRepository;
pub use r#trait::{RegistrationRepository, RegistrationResolver, RepositoryError};
