//! Secret storage queries.

use async_trait::async_trait;
use certman_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use crate::secrets::{SecretError, SecretKind, SecretStore};

#[async_trait]
impl SecretStore for Database {
    async fn create_secret(&self, request_id: &str, kind: SecretKind) -> Result<(), SecretError> {
        sqlx::query("INSERT OR IGNORE INTO secrets (request_id, kind, created_at) VALUES (?, ?, ?)")
            .bind(request_id)
            .bind(kind.as_str())
            .bind(unix_timestamp())
            .execute(self.pool())
            .await
            .map_err(DatabaseError::from)?;

        Ok(())
    }

    async fn add_secret_version(
        &self,
        request_id: &str,
        kind: SecretKind,
        payload: &[u8],
    ) -> Result<i64, SecretError> {
        let mut tx = self.pool().begin().await.map_err(DatabaseError::from)?;

        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM secrets WHERE request_id = ? AND kind = ?")
                .bind(request_id)
                .bind(kind.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from)?;
        if exists.is_none() {
            return Err(SecretError::NotFound(format!("{request_id}/{kind}")));
        }

        let (version,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM secret_versions WHERE request_id = ? AND kind = ?",
        )
        .bind(request_id)
        .bind(kind.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        sqlx::query(
            r"
            INSERT INTO secret_versions (request_id, kind, version, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(request_id)
        .bind(kind.as_str())
        .bind(version)
        .bind(payload)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(version)
    }

    async fn latest_version(
        &self,
        request_id: &str,
        kind: SecretKind,
    ) -> Result<Vec<u8>, SecretError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r"
            SELECT payload FROM secret_versions
            WHERE request_id = ? AND kind = ?
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(request_id)
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(DatabaseError::from)?;

        row.map(|(payload,)| payload)
            .ok_or_else(|| SecretError::NotFound(format!("{request_id}/{kind}")))
    }
}
