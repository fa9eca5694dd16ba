//! Recipient selection, rendering and email logging.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::mailer::{Attachment, Email, Mailbox, Mailer};
use super::{Notifier, NotifyError, templates};
use crate::models::{EmailReason, Registrant, append_email_log, count_sent_emails};

const BUNDLE_CONTENT_TYPE: &str = "application/octet-stream";

/// Sends certificate manager mail through a [`Mailer`].
pub struct EmailManager {
    mailer: Arc<dyn Mailer>,
    admin: Mailbox,
}

impl EmailManager {
    pub fn new(mailer: Arc<dyn Mailer>, admin: Mailbox) -> Self {
        Self { mailer, admin }
    }

    async fn send_to(
        &self,
        to: Mailbox,
        subject: &str,
        text: String,
        attachments: Vec<Attachment>,
    ) -> Result<(), NotifyError> {
        let email = Email {
            to,
            subject: subject.to_string(),
            text,
            attachments,
        };
        self.mailer.send(&email).await
    }

    async fn send_admin(
        &self,
        registrant: &mut Registrant,
        reason: EmailReason,
        subject: &str,
        text: String,
    ) -> Result<usize, NotifyError> {
        self.send_to(self.admin.clone(), subject, text, Vec::new())
            .await?;
        append_email_log(
            &mut registrant.admin_email_log,
            reason,
            subject,
            &self.admin.email,
        );
        info!(registrant_id = %registrant.id, reason = %reason, "Admin notification sent");
        Ok(1)
    }
}

impl std::fmt::Debug for EmailManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailManager")
            .field("admin", &self.admin)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for EmailManager {
    async fn send_deliver_certificates(
        &self,
        registrant: &mut Registrant,
        bundle_path: &Path,
    ) -> Result<usize, NotifyError> {
        let content = tokio::fs::read(bundle_path)
            .await
            .map_err(|e| NotifyError::Attachment(format!("{}: {e}", bundle_path.display())))?;
        let filename = bundle_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| NotifyError::Attachment(bundle_path.display().to_string()))?;

        let body_registrant = registrant.clone();
        let contact = registrant
            .contacts
            .primary_mut()
            .ok_or_else(|| NotifyError::NoRecipient(body_registrant.id.clone()))?;

        let subject = templates::DELIVER_CERTS_SUBJECT;
        self.send_to(
            Mailbox::new(&contact.name, &contact.email),
            subject,
            templates::deliver_certs(&contact.name, &body_registrant),
            vec![Attachment {
                filename,
                content_type: BUNDLE_CONTENT_TYPE.to_string(),
                content,
            }],
        )
        .await?;
        append_email_log(
            &mut contact.email_log,
            EmailReason::DeliverCertificates,
            subject,
            &contact.email,
        );

        info!(registrant_id = %body_registrant.id, "Certificates delivered");
        Ok(1)
    }

    async fn send_contact_reissuance_reminder(
        &self,
        registrant: &mut Registrant,
        window_days: i64,
        reissuance: DateTime<Utc>,
    ) -> Result<usize, NotifyError> {
        let now = Utc::now();
        let body_registrant = registrant.clone();
        let subject = templates::REISSUANCE_REMINDER_SUBJECT;
        let reason = EmailReason::contact_reminder(window_days);
        let mut seen = HashSet::new();
        let mut sent = 0;

        for contact in registrant.contacts.reachable_mut() {
            if !seen.insert(contact.email.clone()) {
                continue;
            }
            if count_sent_emails(&contact.email_log, reason, window_days, now) > 0 {
                debug!(registrant_id = %body_registrant.id, window_days, "Reminder already sent");
                continue;
            }

            self.send_to(
                Mailbox::new(&contact.name, &contact.email),
                subject,
                templates::reissuance_reminder(&contact.name, &body_registrant, reissuance),
                Vec::new(),
            )
            .await?;
            append_email_log(&mut contact.email_log, reason, subject, &contact.email);
            sent += 1;
        }

        if seen.is_empty() {
            return Err(NotifyError::NoRecipient(body_registrant.id));
        }
        Ok(sent)
    }

    async fn send_reissuance_started(
        &self,
        registrant: &mut Registrant,
        secret_link: &str,
    ) -> Result<usize, NotifyError> {
        let body_registrant = registrant.clone();
        let subject = templates::REISSUANCE_STARTED_SUBJECT;
        let mut seen = HashSet::new();

        for contact in registrant.contacts.reachable_mut() {
            if !seen.insert(contact.email.clone()) {
                continue;
            }
            self.send_to(
                Mailbox::new(&contact.name, &contact.email),
                subject,
                templates::reissuance_started(&contact.name, &body_registrant, secret_link),
                Vec::new(),
            )
            .await?;
            append_email_log(
                &mut contact.email_log,
                EmailReason::ReissuanceStarted,
                subject,
                &contact.email,
            );
        }

        if seen.is_empty() {
            return Err(NotifyError::NoRecipient(body_registrant.id));
        }
        Ok(seen.len())
    }

    async fn send_reissuance_admin_notification(
        &self,
        registrant: &mut Registrant,
        _window_days: i64,
        reissuance: DateTime<Utc>,
    ) -> Result<usize, NotifyError> {
        let text = templates::reissuance_admin(registrant, reissuance);
        self.send_admin(
            registrant,
            EmailReason::ReissuanceStarted,
            templates::REISSUANCE_ADMIN_SUBJECT,
            text,
        )
        .await
    }

    async fn send_expires_admin_notification(
        &self,
        registrant: &mut Registrant,
        _window_days: i64,
        reissuance: DateTime<Utc>,
    ) -> Result<usize, NotifyError> {
        let text = templates::expires_admin(registrant, reissuance);
        self.send_admin(
            registrant,
            EmailReason::ReissuanceReminder,
            templates::EXPIRES_ADMIN_SUBJECT,
            text,
        )
        .await
    }
}
