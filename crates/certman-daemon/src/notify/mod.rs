//! Email notifications sent by the certificate manager.
//!
//! - [`Notifier`] is the seam the manager calls
//! - [`EmailManager`] renders messages, picks recipients and keeps email logs
//! - [`Mailer`] delivers rendered messages (SendGrid or the log)

pub mod mailer;
pub mod manager;
pub mod templates;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Registrant;

pub use mailer::{Attachment, Email, LogMailer, Mailbox, Mailer, SendGridMailer};
pub use manager::EmailManager;

/// Errors that can occur while sending notifications.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The registrant has no contact able to receive the message.
    #[error("No recipient for registrant {0}")]
    NoRecipient(String),

    #[error("Invalid mailbox: {0}")]
    Mailbox(String),

    #[error("Could not load attachment: {0}")]
    Attachment(String),

    /// HTTP request to the mail API failed.
    #[error("Mail request error: {0}")]
    Request(String),

    /// The mail API returned a non-success status code.
    #[error("Mail API error (status {status}): {body}")]
    ApiError { status: u16, body: String },
}

/// Messages the certificate manager sends.
///
/// Every method appends to the registrant's email logs and returns the
/// number of messages sent.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the downloaded bundle at `bundle_path` to the registrant.
    async fn send_deliver_certificates(
        &self,
        registrant: &mut Registrant,
        bundle_path: &Path,
    ) -> Result<usize, NotifyError>;

    /// Remind contacts that their certificate is due for reissuance.
    ///
    /// Contacts already reminded within the last `window_days` are skipped.
    async fn send_contact_reissuance_reminder(
        &self,
        registrant: &mut Registrant,
        window_days: i64,
        reissuance: DateTime<Utc>,
    ) -> Result<usize, NotifyError>;

    /// Tell contacts reissuance started and where to fetch the password.
    async fn send_reissuance_started(
        &self,
        registrant: &mut Registrant,
        secret_link: &str,
    ) -> Result<usize, NotifyError>;

    async fn send_reissuance_admin_notification(
        &self,
        registrant: &mut Registrant,
        window_days: i64,
        reissuance: DateTime<Utc>,
    ) -> Result<usize, NotifyError>;

    async fn send_expires_admin_notification(
        &self,
        registrant: &mut Registrant,
        window_days: i64,
        reissuance: DateTime<Utc>,
    ) -> Result<usize, NotifyError>;
}
