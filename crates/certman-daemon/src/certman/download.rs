//! Background download, parsing and delivery of issued certificates.
//!
//! Bundles go to the registrant's webhook first and by email unless the
//! registrant opted out and the webhook accepted them.

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use certman_crypto::{CertificateDetails, bundle, details};

use super::{CertManError, CertManager};
use crate::models::{
    AUTOMATED, Certificate, CertificateRequest, Registrant, RequestState, VerificationState,
};
use crate::secrets::{SecretKind, SecretScope};

/// Result of one background download task.
#[derive(Debug)]
pub struct DownloadReport {
    pub request_id: String,
    pub result: Result<(), CertManError>,
}

/// Deletes the downloaded bundle once delivery is over, whatever the outcome.
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.0.display(), error = %e, "Failed to remove certificate bundle");
        }
    }
}

impl CertManager {
    pub(super) async fn spawn_download(&self, request: CertificateRequest, registrant: Registrant) {
        let manager = self.clone();
        let mut downloads = self.inner.downloads.lock().await;
        downloads.spawn(async move {
            let request_id = request.id.clone();
            let result = manager.download_certificate(request, registrant).await;
            DownloadReport { request_id, result }
        });
        debug!(in_flight = downloads.len(), "Certificate download started");
    }

    async fn download_certificate(
        &self,
        mut request: CertificateRequest,
        mut registrant: Registrant,
    ) -> Result<(), CertManError> {
        let store = &self.inner.store;
        let request_id = request.id.clone();
        let secrets = SecretScope::new(self.inner.secrets.as_ref(), &request_id);

        let path = self
            .inner
            .ca
            .download(request.batch_id, self.inner.storage.path())
            .await?;
        let _cleanup = RemoveOnDrop(path.clone());

        let sealed = tokio::fs::read(&path)
            .await
            .map_err(|e| CertManError::CertStorage(format!("{}: {e}", path.display())))?;
        secrets.put(SecretKind::Cert, &sealed).await?;

        request.transition(
            RequestState::Downloaded,
            "certificate downloaded",
            AUTOMATED,
        )?;
        store.update_request(&request).await?;

        let password = secrets.latest_string(SecretKind::Password).await?;
        let bundle = sealed.clone();
        let details = tokio::task::spawn_blocking(move || open_bundle(&bundle, &password))
            .await
            .map_err(|e| CertManError::Task(e.to_string()))??;

        let certificate = Certificate::issued(&request, details);
        store.update_certificate(&certificate).await?;

        registrant.identity_certificate = Some(certificate.details.clone());
        registrant.link_certificate(&certificate.id);
        request.certificate_id = Some(certificate.id.clone());
        registrant.set_verification(
            VerificationState::Verified,
            "certificate issued",
            AUTOMATED,
        );
        store.update_registrant(&registrant).await?;
        store.update_request(&request).await?;

        info!(
            request_id = %request.id,
            registrant_id = %registrant.id,
            certificate_id = %certificate.id,
            not_after = %certificate.details.not_after,
            "Certificate issued"
        );

        if self.deliver_certificate_by_webhook(&request, &sealed).await {
            self.inner
                .notifier
                .send_deliver_certificates(&mut registrant, &path)
                .await
                .inspect_err(|e| {
                    error!(
                        request_id = %request.id,
                        registrant_id = %registrant.id,
                        error = %e,
                        "Could not deliver certificates"
                    );
                })?;
        }
        store.update_registrant(&registrant).await?;

        request.transition(
            RequestState::Completed,
            "certificate request complete",
            AUTOMATED,
        )?;
        store.update_request(&request).await?;
        Ok(())
    }

    /// Collect downloads that already finished without waiting on the rest.
    pub(super) async fn reap_downloads(&self) -> usize {
        let mut downloads = self.inner.downloads.lock().await;
        let mut reaped = 0;
        while let Some(joined) = downloads.try_join_next() {
            log_download(joined);
            reaped += 1;
        }
        reaped
    }

    /// Wait for every in-flight download to finish.
    pub async fn wait_for_downloads(&self) -> Vec<DownloadReport> {
        let mut pending = std::mem::take(&mut *self.inner.downloads.lock().await);
        let mut reports = Vec::with_capacity(pending.len());
        while let Some(joined) = pending.join_next().await {
            if let Some(report) = log_download(joined) {
                reports.push(report);
            }
        }
        reports
    }
}

/// Open the sealed bundle and parse its leaf certificate.
fn open_bundle(sealed: &[u8], password: &str) -> Result<CertificateDetails, CertManError> {
    let pem_bundle = bundle::open(sealed, password)?;
    Ok(details::extract(&pem_bundle)?)
}

fn log_download(
    joined: Result<DownloadReport, tokio::task::JoinError>,
) -> Option<DownloadReport> {
    match joined {
        Ok(report) => {
            match &report.result {
                Ok(()) => debug!(request_id = %report.request_id, "Certificate download finished"),
                Err(e) => {
                    warn!(
                        request_id = %report.request_id,
                        error = %e,
                        "Certificate download failed"
                    );
                }
            }
            Some(report)
        }
        Err(e) => {
            error!(error = %e, "Certificate download task panicked");
            None
        }
    }
}
