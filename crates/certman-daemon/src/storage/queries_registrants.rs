//! Registrant queries.

use certman_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use crate::models::Registrant;

impl Database {
    /// Get a registrant by ID.
    pub async fn get_registrant(&self, id: &str) -> Result<Registrant, DatabaseError> {
        let (data,): (String,) = sqlx::query_as("SELECT data FROM registrants WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Registrant {id}")))?;

        Ok(serde_json::from_str(&data)?)
    }

    /// Insert or replace a registrant.
    pub async fn upsert_registrant(&self, registrant: &Registrant) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(registrant)?;

        sqlx::query(
            r"
            INSERT INTO registrants (id, common_name, verification_status, data, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                common_name = excluded.common_name,
                verification_status = excluded.verification_status,
                data = excluded.data,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&registrant.id)
        .bind(&registrant.common_name)
        .bind(registrant.verification_status.as_str())
        .bind(data)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
