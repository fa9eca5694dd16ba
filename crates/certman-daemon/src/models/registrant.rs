//! Registrant records as seen by the certificate manager.
//!
//! Registrants are owned by the registration workflow; the manager only
//! reads them and updates verification status, email logs, the identity
//! certificate and the linkage lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use certman_crypto::CertificateDetails;

use super::email::EmailLogEntry;

/// Registration review progress. Declaration order is workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationState {
    NoVerification,
    Submitted,
    EmailVerified,
    PendingReview,
    Reviewed,
    IssuingCertificate,
    Verified,
    Rejected,
    Appealed,
    Errored,
}

impl VerificationState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoVerification => "NO_VERIFICATION",
            Self::Submitted => "SUBMITTED",
            Self::EmailVerified => "EMAIL_VERIFIED",
            Self::PendingReview => "PENDING_REVIEW",
            Self::Reviewed => "REVIEWED",
            Self::IssuingCertificate => "ISSUING_CERTIFICATE",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
            Self::Appealed => "APPEALED",
            Self::Errored => "ERRORED",
        }
    }

    /// Reviewed, issuing or verified registrants may be sent to the CA.
    pub fn eligible_for_issuance(self) -> bool {
        (Self::Reviewed..=Self::Verified).contains(&self)
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub locality: String,
    pub province: String,
    pub country: String,
}

impl Address {
    pub fn is_complete(&self) -> bool {
        !self.locality.is_empty() && !self.province.is_empty() && !self.country.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub email_log: Vec<EmailLogEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    pub technical: Option<Contact>,
    pub administrative: Option<Contact>,
    pub legal: Option<Contact>,
    pub billing: Option<Contact>,
}

impl Contacts {
    /// The contact that receives certificate mail: technical first, then
    /// administrative, legal and billing.
    pub fn primary_mut(&mut self) -> Option<&mut Contact> {
        [
            &mut self.technical,
            &mut self.administrative,
            &mut self.legal,
            &mut self.billing,
        ]
        .into_iter()
        .find_map(|slot| slot.as_mut().filter(|c| !c.email.is_empty()))
    }

    /// Every contact with an email address, technical first.
    pub fn reachable_mut(&mut self) -> impl Iterator<Item = &mut Contact> {
        [
            &mut self.technical,
            &mut self.administrative,
            &mut self.legal,
            &mut self.billing,
        ]
        .into_iter()
        .filter_map(|slot| slot.as_mut().filter(|c| !c.email.is_empty()))
    }
}

/// One recorded verification status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEntry {
    pub timestamp: DateTime<Utc>,
    pub previous: VerificationState,
    pub current: VerificationState,
    pub description: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registrant {
    pub id: String,
    pub common_name: String,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub contacts: Contacts,
    /// Endpoint that receives issued certificates and their passwords.
    #[serde(default)]
    pub certificate_webhook: Option<String>,
    /// Skip email delivery when the webhook succeeds.
    #[serde(default)]
    pub no_email_delivery: bool,
    pub verification_status: VerificationState,
    #[serde(default)]
    pub audit_log: Vec<VerificationEntry>,
    #[serde(default)]
    pub admin_email_log: Vec<EmailLogEntry>,
    #[serde(default)]
    pub identity_certificate: Option<CertificateDetails>,
    #[serde(default)]
    pub certificate_requests: Vec<String>,
    #[serde(default)]
    pub certificates: Vec<String>,
}

impl Registrant {
    /// A freshly submitted registrant with no contacts.
    pub fn new(common_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            common_name: common_name.to_string(),
            dns_names: Vec::new(),
            organization_name: None,
            address: None,
            contacts: Contacts::default(),
            certificate_webhook: None,
            no_email_delivery: false,
            verification_status: VerificationState::Submitted,
            audit_log: Vec::new(),
            admin_email_log: Vec::new(),
            identity_certificate: None,
            certificate_requests: Vec::new(),
            certificates: Vec::new(),
        }
    }

    /// Change verification status, auditing the change. No-op when unchanged.
    pub fn set_verification(&mut self, next: VerificationState, description: &str, source: &str) {
        if self.verification_status == next {
            return;
        }
        self.audit_log.push(VerificationEntry {
            timestamp: Utc::now(),
            previous: self.verification_status,
            current: next,
            description: description.to_string(),
            source: source.to_string(),
        });
        self.verification_status = next;
    }

    /// Link a certificate request id. Returns false if already linked.
    pub fn link_certificate_request(&mut self, id: &str) -> bool {
        append_unique(&mut self.certificate_requests, id)
    }

    /// Link a certificate id. Returns false if already linked.
    pub fn link_certificate(&mut self, id: &str) -> bool {
        append_unique(&mut self.certificates, id)
    }
}

fn append_unique(ids: &mut Vec<String>, id: &str) -> bool {
    if ids.iter().any(|existing| existing == id) {
        return false;
    }
    ids.push(id.to_string());
    true
}
