//! Issued certificate queries.

use certman_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use crate::models::Certificate;

impl Database {
    /// Get a certificate by its serial number ID.
    pub async fn get_certificate(&self, id: &str) -> Result<Certificate, DatabaseError> {
        let (data,): (String,) = sqlx::query_as("SELECT data FROM certificates WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Certificate {id}")))?;

        Ok(serde_json::from_str(&data)?)
    }

    /// Insert or replace a certificate.
    pub async fn upsert_certificate(&self, certificate: &Certificate) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(certificate)?;

        sqlx::query(
            r"
            INSERT INTO certificates (id, request_id, registrant_id, status, data, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                request_id = excluded.request_id,
                registrant_id = excluded.registrant_id,
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&certificate.id)
        .bind(&certificate.request_id)
        .bind(&certificate.registrant_id)
        .bind(certificate.status.as_str())
        .bind(data)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
