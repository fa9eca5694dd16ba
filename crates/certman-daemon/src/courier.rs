//! Webhook delivery of issued certificates and their passwords.
//!
//! Registrants may name a webhook that receives the sealed bundle and the
//! bundle password directly. Deliveries are retried with exponential backoff;
//! the manager falls back to email when every attempt fails.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("Webhook request error: {0}")]
    Request(String),

    #[error("Webhook returned error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Webhook delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[async_trait]
pub trait Courier: Send + Sync {
    /// Hand the sealed bundle for `request_id` to the webhook.
    async fn store_certificate(
        &self,
        webhook: &str,
        request_id: &str,
        payload: &[u8],
    ) -> Result<(), CourierError>;

    /// Hand the bundle password for `request_id` to the webhook.
    async fn store_certificate_password(
        &self,
        webhook: &str,
        request_id: &str,
        password: &str,
    ) -> Result<(), CourierError>;
}

/// Exponential backoff between webhook delivery attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryBackoff {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Attempts after the first one.
    pub max_retries: u32,
}

impl Default for DeliveryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

impl DeliveryBackoff {
    /// Delay after failed attempt `attempt` (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Run `deliver` until it succeeds or `max_retries` retries are used up.
    pub async fn retry<F, Fut>(
        &self,
        webhook: &str,
        what: &str,
        mut deliver: F,
    ) -> Result<(), CourierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), CourierError>>,
    {
        let attempts = self.max_retries.saturating_add(1);
        let mut last = String::new();

        for attempt in 0..attempts {
            match deliver().await {
                Ok(()) => {
                    debug!(webhook, what, attempts = attempt + 1, "Webhook delivery succeeded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        webhook,
                        what,
                        attempts = attempt + 1,
                        error = %e,
                        "Webhook delivery failed"
                    );
                    last = e.to_string();
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.delay_for_attempt(attempt)).await;
            }
        }

        Err(CourierError::Exhausted { attempts, last })
    }
}

#[derive(Debug, Serialize)]
struct StoreCertificateRequest<'a> {
    id: &'a str,
    base64_certificate: String,
}

#[derive(Debug, Serialize)]
struct StorePasswordRequest<'a> {
    id: &'a str,
    password: &'a str,
}

/// HTTP client for certificate webhooks.
#[derive(Debug)]
pub struct CourierClient {
    http: reqwest::Client,
}

impl CourierClient {
    /// # Errors
    ///
    /// Returns `CourierError::Request` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, CourierError> {
        // Install ring as the default crypto provider (no-op if already installed).
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CourierError::Request(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn certificate_url(webhook: &str, request_id: &str) -> String {
        format!("{}/v1/certs/{request_id}", webhook.trim_end_matches('/'))
    }

    pub fn password_url(webhook: &str, request_id: &str) -> String {
        format!("{}/pkcs12password", Self::certificate_url(webhook, request_id))
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<(), CourierError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| CourierError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "Certificate webhook returned error");
            return Err(CourierError::ApiError {
                status: status_code,
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Courier for CourierClient {
    async fn store_certificate(
        &self,
        webhook: &str,
        request_id: &str,
        payload: &[u8],
    ) -> Result<(), CourierError> {
        let body = StoreCertificateRequest {
            id: request_id,
            base64_certificate: STANDARD.encode(payload),
        };
        self.post(&Self::certificate_url(webhook, request_id), &body)
            .await
    }

    async fn store_certificate_password(
        &self,
        webhook: &str,
        request_id: &str,
        password: &str,
    ) -> Result<(), CourierError> {
        let body = StorePasswordRequest {
            id: request_id,
            password,
        };
        self.post(&Self::password_url(webhook, request_id), &body)
            .await
    }
}
