//! One-time secret links.
//!
//! Reissuance passwords are never emailed directly; contacts get a link to
//! a secret that can be opened a limited number of times before it expires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum WhisperError {
    #[error("Whisper request error: {0}")]
    Request(String),

    #[error("Whisper API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Invalid secret link parameters: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait SecretLinker: Send + Sync {
    /// Store `secret` and return a link that opens it at most `accesses`
    /// times before `expires`.
    async fn create_secret_link(
        &self,
        secret: &str,
        accesses: u32,
        expires: DateTime<Utc>,
    ) -> Result<String, WhisperError>;
}

#[derive(Debug, Serialize)]
struct CreateSecretRequest<'a> {
    secret: &'a str,
    accesses: u32,
    lifetime: String,
}

#[derive(Debug, Deserialize)]
struct CreateSecretReply {
    token: String,
}

/// Client for the whisper secret sharing service.
#[derive(Debug)]
pub struct WhisperClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WhisperClient {
    /// # Errors
    ///
    /// Returns `WhisperError::Request` if the HTTP client cannot be built.
    pub fn new(endpoint: &str) -> Result<Self, WhisperError> {
        // Install ring as the default crypto provider (no-op if already installed).
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| WhisperError::Request(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn lifetime(expires: DateTime<Utc>) -> Result<String, WhisperError> {
        let seconds = (expires - Utc::now()).num_seconds();
        if seconds <= 0 {
            return Err(WhisperError::Invalid("expiry is in the past".into()));
        }
        Ok(format!("{seconds}s"))
    }

    pub fn secret_url(&self, token: &str) -> String {
        format!("{}/secret/{token}", self.endpoint)
    }
}

#[async_trait]
impl SecretLinker for WhisperClient {
    async fn create_secret_link(
        &self,
        secret: &str,
        accesses: u32,
        expires: DateTime<Utc>,
    ) -> Result<String, WhisperError> {
        if accesses == 0 {
            return Err(WhisperError::Invalid("accesses must be positive".into()));
        }
        let body = CreateSecretRequest {
            secret,
            accesses,
            lifetime: Self::lifetime(expires)?,
        };

        let response = self
            .http
            .post(format!("{}/v1/secrets", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| WhisperError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "Whisper API returned error");
            return Err(WhisperError::ApiError {
                status: status_code,
                body,
            });
        }

        let reply: CreateSecretReply = response
            .json()
            .await
            .map_err(|e| WhisperError::Request(e.to_string()))?;
        debug!(accesses, "Secret link created");
        Ok(self.secret_url(&reply.token))
    }
}


#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn secret_url_trims_endpoint() {
        let client = WhisperClient::new("https://whisper.example.com/").unwrap();
        assert_eq!(
            client.secret_url("tok"),
            "https://whisper.example.com/secret/tok"
        );
    }

    #[test]
    fn lifetime_is_positive_seconds() {
        let lifetime = WhisperClient::lifetime(Utc::now() + Duration::days(7)).unwrap();
        let seconds: i64 = lifetime.trim_end_matches('s').parse().unwrap();
        assert!(seconds > 600_000 && seconds <= 604_800);
        assert!(WhisperClient::lifetime(Utc::now() - Duration::hours(1)).is_err());
    }

    #[tokio::test]
    async fn zero_accesses_is_refused() {
        let client = WhisperClient::new("https://whisper.example.com").unwrap();
        let err = client
            .create_secret_link("pw", 0, Utc::now() + Duration::days(7))
            .await
            .unwrap_err();
        assert!(matches!(err, WhisperError::Invalid(_)));
    }
}
