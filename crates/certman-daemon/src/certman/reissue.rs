//! Reminders and automated reissuance ahead of identity certificate expiry.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use certman_crypto::CertificateDetails;

use super::{CertManError, CertManager};
use crate::models::{
    AUTOMATED, CertificateRequest, EmailReason, Registrant, RequestState, VerificationState,
    count_sent_emails,
};
use crate::secrets::{SecretKind, SecretScope};
use crate::storage::Cursor;

/// Days before expiry at which a new certificate is requested.
const REISSUANCE_DAYS: i64 = 10;
const FINAL_REMINDER_DAYS: i64 = 7;
const FIRST_REMINDER_DAYS: i64 = 30;

/// Times the password link may be opened.
const LINK_ACCESSES: u32 = 3;
const LINK_LIFETIME_DAYS: i64 = 7;

/// What the reissuance pass did for one registrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReissuanceAction {
    /// Not verified; left alone.
    Skipped,
    /// Verified but without a usable identity certificate.
    Invalid,
    Expired,
    SevenDayReminder,
    /// A request for this registrant is already in the pipeline.
    InProgress,
    Reissued,
    ThirtyDayReminder,
    NoAction,
    /// Processing the registrant failed; retried on the next pass.
    Failed,
}

impl CertManager {
    /// Walk every registrant once, reminding and reissuing as expiry nears.
    pub async fn handle_certificate_reissuance(&self) -> Vec<(String, ReissuanceAction)> {
        let mut actions = Vec::new();
        let mut cursor = Cursor::<Registrant>::new(self.inner.store.as_ref());

        while let Some(item) = cursor.next().await {
            let registrant = match item {
                Ok(registrant) => registrant,
                Err(e) => {
                    error!(error = %e, "Could not read registrant");
                    continue;
                }
            };
            let id = registrant.id.clone();
            let action = match self.reissue_registrant(registrant).await {
                Ok(action) => action,
                Err(e) => {
                    error!(registrant_id = %id, error = %e, "Reissuance check failed");
                    ReissuanceAction::Failed
                }
            };
            actions.push((id, action));
        }

        debug!(registrants = actions.len(), "Certificate reissuance pass complete");
        actions
    }

    async fn reissue_registrant(
        &self,
        mut registrant: Registrant,
    ) -> Result<ReissuanceAction, CertManError> {
        if registrant.verification_status != VerificationState::Verified {
            return Ok(ReissuanceAction::Skipped);
        }

        let expiry = registrant
            .identity_certificate
            .as_ref()
            .map(CertificateDetails::expires_at);
        let not_after = match expiry {
            Some(Ok(not_after)) => not_after,
            Some(Err(e)) => {
                error!(
                    registrant_id = %registrant.id,
                    error = %e,
                    "Identity certificate has no valid expiry"
                );
                return Ok(ReissuanceAction::Invalid);
            }
            None => {
                error!(
                    registrant_id = %registrant.id,
                    "Verified registrant has no identity certificate"
                );
                return Ok(ReissuanceAction::Invalid);
            }
        };

        let now = Utc::now();
        let days = days_until(not_after, now);
        let reissuance = not_after - Duration::days(REISSUANCE_DAYS);

        let result = self
            .apply_reissuance_branch(&mut registrant, days, reissuance, now)
            .await;
        self.inner.store.update_registrant(&registrant).await?;
        result
    }

    async fn apply_reissuance_branch(
        &self,
        registrant: &mut Registrant,
        days: f64,
        reissuance: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReissuanceAction, CertManError> {
        let notifier = &self.inner.notifier;

        if days < 0.0 {
            warn!(registrant_id = %registrant.id, days, "Identity certificate has expired");
            return Ok(ReissuanceAction::Expired);
        }

        if days <= window(FINAL_REMINDER_DAYS) {
            self.remind_contacts(registrant, FINAL_REMINDER_DAYS, reissuance)
                .await;
            return Ok(ReissuanceAction::SevenDayReminder);
        }

        if days <= window(REISSUANCE_DAYS) {
            if self.has_request_in_flight(registrant).await? {
                info!(registrant_id = %registrant.id, "Certificate reissuance already in progress");
                return Ok(ReissuanceAction::InProgress);
            }
            self.reissue(registrant).await?;
            notifier
                .send_reissuance_admin_notification(registrant, REISSUANCE_DAYS, reissuance)
                .await?;
            return Ok(ReissuanceAction::Reissued);
        }

        if days <= window(FIRST_REMINDER_DAYS) {
            self.remind_contacts(registrant, FIRST_REMINDER_DAYS, reissuance)
                .await;
            if count_sent_emails(
                &registrant.admin_email_log,
                EmailReason::ReissuanceReminder,
                FIRST_REMINDER_DAYS,
                now,
            ) == 0
            {
                notifier
                    .send_expires_admin_notification(registrant, FIRST_REMINDER_DAYS, reissuance)
                    .await?;
            }
            return Ok(ReissuanceAction::ThirtyDayReminder);
        }

        Ok(ReissuanceAction::NoAction)
    }

    async fn remind_contacts(
        &self,
        registrant: &mut Registrant,
        window_days: i64,
        reissuance: DateTime<Utc>,
    ) {
        match self
            .inner
            .notifier
            .send_contact_reissuance_reminder(registrant, window_days, reissuance)
            .await
        {
            Ok(sent) => {
                debug!(
                    registrant_id = %registrant.id,
                    window_days,
                    sent,
                    "Reissuance reminders sent"
                );
            }
            Err(e) => {
                warn!(
                    registrant_id = %registrant.id,
                    window_days,
                    error = %e,
                    "Could not send reissuance reminder"
                );
            }
        }
    }

    async fn has_request_in_flight(&self, registrant: &Registrant) -> Result<bool, CertManError> {
        for request_id in &registrant.certificate_requests {
            match self.inner.store.retrieve_request(request_id).await {
                Ok(request) if request.awaiting_certificate() => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    warn!(
                        registrant_id = %registrant.id,
                        request_id = %request_id,
                        "Linked certificate request is missing"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Queue a new certificate request and deliver its password.
    ///
    /// The password goes to the webhook when one is set, and as a one-time
    /// link by email unless the webhook took it and email is turned off.
    async fn reissue(&self, registrant: &mut Registrant) -> Result<(), CertManError> {
        let mut request = CertificateRequest::new(registrant);
        request.transition(
            RequestState::ReadyToSubmit,
            "automated certificate reissuance",
            AUTOMATED,
        )?;

        let password = certman_crypto::token::bundle_password();
        SecretScope::new(self.inner.secrets.as_ref(), &request.id)
            .put(SecretKind::Password, password.as_bytes())
            .await?;

        let link = if self.deliver_password_by_webhook(&request, &password).await {
            let link = self
                .inner
                .linker
                .create_secret_link(
                    &password_message(&password),
                    LINK_ACCESSES,
                    Utc::now() + Duration::days(LINK_LIFETIME_DAYS),
                )
                .await?;
            Some(link)
        } else {
            None
        };

        self.inner.store.update_request(&request).await?;
        registrant.link_certificate_request(&request.id);
        self.inner.store.update_registrant(registrant).await?;
        info!(
            registrant_id = %registrant.id,
            request_id = %request.id,
            "Certificate reissuance requested"
        );

        if let Some(link) = link {
            self.inner
                .notifier
                .send_reissuance_started(registrant, &link)
                .await?;
        }
        Ok(())
    }
}

fn password_message(password: &str) -> String {
    format!(
        "Below is the PKCS12 password which you must use to decrypt your new certificates:\n\n{password}\n"
    )
}

#[allow(clippy::cast_precision_loss)]
fn window(days: i64) -> f64 {
    days as f64
}

/// Fractional days from `now` until `not_after`; negative once expired.
#[allow(clippy::cast_precision_loss)]
fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (not_after - now).num_milliseconds() as f64 / 86_400_000.0
}
