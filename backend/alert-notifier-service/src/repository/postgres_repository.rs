use super::r#trait::{ensure_valid_client_id, RegistrationRepository, RepositoryError};
use crate::models::Registration;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

/// PostgreSQL-backed registration store (`telegram_registrations`)
#[derive(Clone)]
pub struct PostgresRegistrationRepository {
    pool: PgPool,
}

impl PostgresRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistrationRepository for PostgresRegistrationRepository {
    async fn create(&self, registration: &Registration) -> Result<(), RepositoryError> {
        ensure_valid_client_id(&registration.client_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO telegram_registrations (client_id, destination, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (client_id) DO NOTHING
            "#,
        )
        .bind(&registration.client_id)
        .bind(&registration.destination)
        .bind(registration.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(registration.client_id.clone()));
        }

        debug!(client_id = %registration.client_id, "Created registration");
        Ok(())
    }

    async fn delete(&self, client_id: &str) -> Result<(), RepositoryError> {
        ensure_valid_client_id(client_id)?;

        let result = sqlx::query("DELETE FROM telegram_registrations WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(client_id.to_string()));
        }

        debug!(client_id = %client_id, "Deleted registration");
        Ok(())
    }

    async fn find(&self, client_id: &str) -> Result<Option<Registration>, RepositoryError> {
        ensure_valid_client_id(client_id)?;

        let registration = sqlx::query_as::<_, Registration>(
            r#"
            SELECT client_id, destination, created_at
            FROM telegram_registrations
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(registration)
    }
}
