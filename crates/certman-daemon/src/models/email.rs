//! Sent email logs kept on contacts and registrants.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Why an email was sent. Used to deduplicate repeat sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmailReason {
    DeliverCertificates,
    /// Admin notice that a certificate expires within 30 days.
    ReissuanceReminder,
    /// Contact reminder inside the final 7 day window.
    FinalReissuanceReminder,
    /// Contact reminder inside the 30 day window.
    FirstReissuanceReminder,
    ReissuanceStarted,
}

impl EmailReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeliverCertificates => "deliver_certs",
            Self::ReissuanceReminder => "reissuance_reminder",
            Self::FinalReissuanceReminder => "reissuance_reminder_7",
            Self::FirstReissuanceReminder => "reissuance_reminder_30",
            Self::ReissuanceStarted => "reissuance_started",
        }
    }

    /// Reason logged for a contact reminder sent `window_days` before reissuance.
    pub const fn contact_reminder(window_days: i64) -> Self {
        if window_days <= 7 {
            Self::FinalReissuanceReminder
        } else {
            Self::FirstReissuanceReminder
        }
    }
}

impl std::fmt::Display for EmailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLogEntry {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub subject: String,
    pub recipient: String,
}

/// Record a sent email.
pub fn append_email_log(
    log: &mut Vec<EmailLogEntry>,
    reason: EmailReason,
    subject: &str,
    recipient: &str,
) {
    log.push(EmailLogEntry {
        timestamp: Utc::now(),
        reason: reason.as_str().to_string(),
        subject: subject.to_string(),
        recipient: recipient.to_string(),
    });
}

/// Count emails sent for `reason` within the last `window_days` days.
pub fn count_sent_emails(
    log: &[EmailLogEntry],
    reason: EmailReason,
    window_days: i64,
    now: DateTime<Utc>,
) -> usize {
    let since = now - Duration::days(window_days);
    log.iter()
        .filter(|entry| entry.reason == reason.as_str() && entry.timestamp >= since)
        .count()
}
