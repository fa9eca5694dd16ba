//! Batch status checks for processing certificate requests.

use tracing::{error, info, warn};

use super::{CertManError, CertManager};
use crate::ca::batch_status;
use crate::models::{AUTOMATED, CertificateRequest, RequestState, VerificationState};

/// What a status check did to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The CA is still working on the batch.
    Pending,
    /// The CA rejected the batch.
    Rejected,
    /// The batch failed without a rejection.
    Errored,
    /// The CA reported counts and status that do not fit together.
    Unhandled,
    /// The registrant left `ISSUING_CERTIFICATE` while the CA worked.
    RegistrantChanged,
    /// The certificate is being downloaded in the background.
    Downloading,
}

impl CertManager {
    /// Follow a `PROCESSING` request's batch one step.
    pub(crate) async fn check_request(
        &self,
        mut request: CertificateRequest,
    ) -> Result<CheckOutcome, CertManError> {
        if request.batch_id == 0 {
            return Err(CertManError::MissingBatch(request.id));
        }
        let ca = &self.inner.ca;
        let store = &self.inner.store;

        let detail = ca.batch_detail(request.batch_id).await?;
        request.batch_status = detail.status;
        request.reject_reason = detail.reject_reason;

        if batch_status::is_stale(&request.batch_status) {
            request.batch_status = ca.batch_status(request.batch_id).await?;
        }

        let counts = ca.processing_info(request.batch_id).await?;

        if counts.active > 0 {
            info!(
                request_id = %request.id,
                batch_id = request.batch_id,
                active = counts.active,
                "Certificate batch still processing"
            );
            request.transition(
                RequestState::Processing,
                "awaiting batch processing",
                AUTOMATED,
            )?;
            store.update_request(&request).await?;
            return Ok(CheckOutcome::Pending);
        }

        let ready = request.batch_status == batch_status::READY_FOR_DOWNLOAD;

        if counts.failed > 0 && counts.success == 0 && !ready {
            let rejected = !request.reject_reason.is_empty()
                || request.batch_status == batch_status::REJECTED;
            let (state, description, outcome) = if rejected {
                (
                    RequestState::CrRejected,
                    "certificate request rejected",
                    CheckOutcome::Rejected,
                )
            } else {
                (
                    RequestState::CrErrored,
                    "certificate request errored",
                    CheckOutcome::Errored,
                )
            };
            warn!(
                request_id = %request.id,
                batch_status = %request.batch_status,
                reject_reason = %request.reject_reason,
                "Certificate batch failed"
            );
            request.transition(state, description, AUTOMATED)?;
            store.update_request(&request).await?;
            return Ok(outcome);
        }

        if counts.failed > 0 {
            warn!(
                request_id = %request.id,
                success = counts.success,
                failed = counts.failed,
                "Some certificates in batch failed"
            );
        }

        if counts.success == 0 || !ready {
            error!(
                severity = "critical",
                request_id = %request.id,
                batch_status = %request.batch_status,
                active = counts.active,
                success = counts.success,
                failed = counts.failed,
                "Unhandled CA batch state"
            );
            request.transition(RequestState::Processing, "unhandled CA state", AUTOMATED)?;
            store.update_request(&request).await?;
            return Ok(CheckOutcome::Unhandled);
        }

        request.transition(
            RequestState::Downloading,
            "certificate ready for download",
            AUTOMATED,
        )?;
        store.update_request(&request).await?;

        let registrant = store.retrieve_registrant(&request.registrant_id).await?;
        if registrant.verification_status != VerificationState::IssuingCertificate {
            warn!(
                request_id = %request.id,
                registrant_id = %registrant.id,
                status = %registrant.verification_status,
                "Registrant changed during issuance, rejecting certificate request"
            );
            request.transition(
                RequestState::CrRejected,
                "registrant no longer issuing certificate",
                AUTOMATED,
            )?;
            store.update_request(&request).await?;
            return Ok(CheckOutcome::RegistrantChanged);
        }

        self.spawn_download(request, registrant).await;
        Ok(CheckOutcome::Downloading)
    }
}
