//! Issued certificate records.

use serde::{Deserialize, Serialize};

use certman_crypto::CertificateDetails;

use super::request::CertificateRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateState {
    Issued,
    Expired,
    Revoked,
}

impl CertificateState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "ISSUED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
        }
    }
}

impl std::fmt::Display for CertificateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A certificate downloaded from the CA for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Uppercase hex serial number.
    pub id: String,
    pub request_id: String,
    pub registrant_id: String,
    pub status: CertificateState,
    pub details: CertificateDetails,
}

impl Certificate {
    /// Record a freshly issued certificate for `request`.
    pub fn issued(request: &CertificateRequest, details: CertificateDetails) -> Self {
        Self {
            id: details.serial_hex(),
            request_id: request.id.clone(),
            registrant_id: request.registrant_id.clone(),
            status: CertificateState::Issued,
            details,
        }
    }
}
