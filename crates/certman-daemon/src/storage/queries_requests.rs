//! Certificate request queries.

use certman_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use crate::models::CertificateRequest;

impl Database {
    /// Get a certificate request by ID.
    pub async fn get_certificate_request(
        &self,
        id: &str,
    ) -> Result<CertificateRequest, DatabaseError> {
        let (data,): (String,) =
            sqlx::query_as("SELECT data FROM certificate_requests WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?
                .ok_or_else(|| DatabaseError::NotFound(format!("Certificate request {id}")))?;

        Ok(serde_json::from_str(&data)?)
    }

    /// Insert or replace a certificate request.
    pub async fn upsert_certificate_request(
        &self,
        request: &CertificateRequest,
    ) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(request)?;

        sqlx::query(
            r"
            INSERT INTO certificate_requests (id, registrant_id, status, data, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                registrant_id = excluded.registrant_id,
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&request.id)
        .bind(&request.registrant_id)
        .bind(request.status.as_str())
        .bind(data)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
