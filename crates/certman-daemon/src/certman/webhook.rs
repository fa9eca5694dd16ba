//! Webhook delivery with email fallback.

use tracing::{error, info};

use super::CertManager;
use crate::courier::CourierError;
use crate::models::CertificateRequest;

impl CertManager {
    /// Send the sealed bundle to the request's webhook, if it has one.
    ///
    /// Returns whether the bundle must still go out by email.
    pub(super) async fn deliver_certificate_by_webhook(
        &self,
        request: &CertificateRequest,
        payload: &[u8],
    ) -> bool {
        let Some(webhook) = request.webhook.as_deref() else {
            return !request.no_email_delivery;
        };
        let courier = self.inner.courier.as_ref();
        let result = self
            .inner
            .settings
            .delivery
            .retry(webhook, "certificate", || {
                courier.store_certificate(webhook, &request.id, payload)
            })
            .await;
        email_needed(request, webhook, "certificate", result)
    }

    /// Send the bundle password to the request's webhook, if it has one.
    ///
    /// Returns whether the password link must still go out by email.
    pub(super) async fn deliver_password_by_webhook(
        &self,
        request: &CertificateRequest,
        password: &str,
    ) -> bool {
        let Some(webhook) = request.webhook.as_deref() else {
            return !request.no_email_delivery;
        };
        let courier = self.inner.courier.as_ref();
        let result = self
            .inner
            .settings
            .delivery
            .retry(webhook, "password", || {
                courier.store_certificate_password(webhook, &request.id, password)
            })
            .await;
        email_needed(request, webhook, "password", result)
    }
}

/// Email goes out unless the registrant opted out and the webhook took it.
fn email_needed(
    request: &CertificateRequest,
    webhook: &str,
    what: &str,
    result: Result<(), CourierError>,
) -> bool {
    match result {
        Ok(()) => {
            info!(request_id = %request.id, webhook, what, "Delivered by webhook");
            !request.no_email_delivery
        }
        Err(e) => {
            error!(
                request_id = %request.id,
                webhook,
                what,
                error = %e,
                "Webhook delivery failed, falling back to email"
            );
            true
        }
    }
}
