//! Submission of ready certificate requests to the CA.

use tracing::{error, info, warn};

use super::{CertManError, CertManager};
use crate::ca::BatchInfo;
use crate::models::{AUTOMATED, CertificateRequest, RequestState, VerificationState};
use crate::profile;
use crate::secrets::{SecretKind, SecretScope};

/// What a submission attempt did to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The batch was created and the request is now processing.
    Submitted { batch_id: i64 },
    /// The registrant may not be issued a certificate.
    Rejected,
}

impl CertManager {
    /// Submit a `READY_TO_SUBMIT` request as a single-certificate batch.
    ///
    /// CA side failures are logged as critical and leave the request where
    /// it is so the next tick retries it.
    pub(crate) async fn submit_request(
        &self,
        mut request: CertificateRequest,
    ) -> Result<SubmitOutcome, CertManError> {
        let store = &self.inner.store;
        let mut registrant = store
            .retrieve_registrant(&request.registrant_id)
            .await
            .inspect_err(|e| {
                warn!(
                    request_id = %request.id,
                    registrant_id = %request.registrant_id,
                    error = %e,
                    "Could not fetch registrant for certificate request"
                );
            })?;

        if !registrant.verification_status.eligible_for_issuance() {
            warn!(
                request_id = %request.id,
                registrant_id = %registrant.id,
                status = %registrant.verification_status,
                "Registrant is not eligible for certificate issuance"
            );
            request.transition(
                RequestState::CrRejected,
                "certificate request rejected",
                AUTOMATED,
            )?;
            store.update_request(&request).await?;
            return Ok(SubmitOutcome::Rejected);
        }

        registrant.set_verification(
            VerificationState::IssuingCertificate,
            "issuing certificate",
            AUTOMATED,
        );
        store.update_registrant(&registrant).await?;

        let batch = self.submit_batch(&request).await.inspect_err(|e| {
            error!(
                severity = "critical",
                request_id = %request.id,
                error = %e,
                "Certificate request submission failed"
            );
        })?;

        request.authority_id = batch.authority_id;
        request.batch_id = batch.info.batch_id;
        request.batch_name = batch.info.batch_name;
        request.batch_status = batch.info.status;
        request.order_number = batch.info.order_number;
        request.creation_date = batch.info.creation_date;
        request.profile = batch.info.profile;
        request.reject_reason = batch.info.reject_reason;
        request.transition(RequestState::Processing, "certificate submitted", AUTOMATED)?;
        store.update_request(&request).await?;

        info!(
            request_id = %request.id,
            batch_id = request.batch_id,
            batch_name = %request.batch_name,
            "Certificate request submitted"
        );
        Ok(SubmitOutcome::Submitted {
            batch_id: request.batch_id,
        })
    }

    async fn submit_batch(&self, request: &CertificateRequest) -> Result<Submitted, CertManError> {
        let authority_id = self.select_authority().await?;

        let password = SecretScope::new(self.inner.secrets.as_ref(), &request.id)
            .latest_string(SecretKind::Password)
            .await?;

        let params = self.inner.settings.profile.build_params(request, &password)?;
        let batch_name = format!("{}-certreq-{}", self.inner.settings.directory_id, request.id);

        let info = self
            .inner
            .ca
            .create_single_cert_batch(authority_id, &batch_name, &params)
            .await
            .inspect_err(|e| {
                error!(
                    severity = "critical",
                    batch_name = %batch_name,
                    params = ?profile::masked(&params),
                    error = %e,
                    "CA refused certificate batch"
                );
            })?;

        Ok(Submitted { authority_id, info })
    }

    /// First authority, in CA order, with a positive balance.
    ///
    /// An authority whose balance cannot be read is skipped.
    async fn select_authority(&self) -> Result<i64, CertManError> {
        for authority in self.inner.ca.user_authorities().await? {
            let balance = match self
                .inner
                .ca
                .authority_available_balance(authority.id)
                .await
            {
                Ok(balance) => balance,
                Err(e) => {
                    error!(
                        authority_id = authority.id,
                        error = %e,
                        "Could not fetch authority balance"
                    );
                    continue;
                }
            };
            if balance > 0 {
                return Ok(authority.id);
            }
            warn!(authority_id = authority.id, "Authority has no available balance");
        }
        Err(CertManError::NoAuthority)
    }
}

struct Submitted {
    authority_id: i64,
    info: BatchInfo,
}
