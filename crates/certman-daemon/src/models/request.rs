//! Certificate request record and its state machine.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registrant::Registrant;
use crate::profile::ParamKey;

/// Audit source recorded for transitions made by the manager itself.
pub const AUTOMATED: &str = "automated";

/// Lifecycle state of a certificate request.
///
/// Declaration order is pipeline order; the two failure states come last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Initialized,
    ReadyToSubmit,
    Processing,
    Downloading,
    Downloaded,
    Completed,
    CrRejected,
    CrErrored,
}

impl RequestState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::ReadyToSubmit => "READY_TO_SUBMIT",
            Self::Processing => "PROCESSING",
            Self::Downloading => "DOWNLOADING",
            Self::Downloaded => "DOWNLOADED",
            Self::Completed => "COMPLETED",
            Self::CrRejected => "CR_REJECTED",
            Self::CrErrored => "CR_ERRORED",
        }
    }

    /// Completed, rejected and errored requests are never picked up again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::CrRejected | Self::CrErrored)
    }

    pub const fn is_failure(self) -> bool {
        matches!(self, Self::CrRejected | Self::CrErrored)
    }

    /// Submitted or about to be, but not yet finished.
    pub fn is_in_flight(self) -> bool {
        (Self::ReadyToSubmit..=Self::Downloaded).contains(&self)
    }

    /// Whether the pipeline may move from `self` to `next`.
    ///
    /// Moves go forward, stay in place, or drop into a failure state.
    /// Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_failure() || next >= self
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestState {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIALIZED" => Ok(Self::Initialized),
            "READY_TO_SUBMIT" => Ok(Self::ReadyToSubmit),
            "PROCESSING" => Ok(Self::Processing),
            "DOWNLOADING" => Ok(Self::Downloading),
            "DOWNLOADED" => Ok(Self::Downloaded),
            "COMPLETED" => Ok(Self::Completed),
            "CR_REJECTED" => Ok(Self::CrRejected),
            "CR_ERRORED" => Ok(Self::CrErrored),
            other => Err(TransitionError::UnknownState(other.to_string())),
        }
    }
}

/// Errors raised by the request state machine.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid certificate request transition from {from} to {to}")]
    Invalid { from: RequestState, to: RequestState },

    #[error("Unknown certificate request state: {0}")]
    UnknownState(String),
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub previous: RequestState,
    pub current: RequestState,
    pub description: String,
    pub source: String,
}

/// A single certificate issuance attempt for a registrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub id: String,
    pub registrant_id: String,
    pub common_name: String,
    pub status: RequestState,

    // Populated from the CA once the batch is submitted.
    #[serde(default)]
    pub authority_id: i64,
    #[serde(default)]
    pub batch_id: i64,
    #[serde(default)]
    pub batch_name: String,
    #[serde(default)]
    pub batch_status: String,
    #[serde(default)]
    pub order_number: i64,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub reject_reason: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub certificate_id: Option<String>,
    /// Copied from the registrant when the request is created.
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub no_email_delivery: bool,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl CertificateRequest {
    /// Start a new request for `registrant` in the `INITIALIZED` state.
    ///
    /// Organization name is copied when known; locality, province and
    /// country only when all three are present.
    pub fn new(registrant: &Registrant) -> Self {
        let now = Utc::now();
        let mut params = BTreeMap::new();

        if let Some(org) = registrant.organization_name.as_deref().filter(|o| !o.is_empty()) {
            params.insert(ParamKey::OrganizationName.as_str().to_string(), org.to_string());
        }
        if let Some(address) = registrant.address.as_ref().filter(|a| a.is_complete()) {
            params.insert(
                ParamKey::LocalityName.as_str().to_string(),
                address.locality.clone(),
            );
            params.insert(
                ParamKey::StateOrProvinceName.as_str().to_string(),
                address.province.clone(),
            );
            params.insert(
                ParamKey::CountryName.as_str().to_string(),
                address.country.clone(),
            );
        }

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            registrant_id: registrant.id.clone(),
            common_name: registrant.common_name.clone(),
            status: RequestState::Initialized,
            authority_id: 0,
            batch_id: 0,
            batch_name: String::new(),
            batch_status: String::new(),
            order_number: 0,
            creation_date: String::new(),
            profile: String::new(),
            reject_reason: String::new(),
            params,
            dns_names: registrant.dns_names.clone(),
            certificate_id: None,
            webhook: registrant
                .certificate_webhook
                .clone()
                .filter(|w| !w.is_empty()),
            no_email_delivery: registrant.no_email_delivery,
            audit_log: Vec::new(),
            created: now,
            modified: now,
        }
    }

    /// Move to `next`, appending one audit entry.
    pub fn transition(
        &mut self,
        next: RequestState,
        description: &str,
        source: &str,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: next,
            });
        }
        self.record(next, description, source);
        Ok(())
    }

    /// In flight and still waiting on its certificate.
    ///
    /// A request parked at `DOWNLOADED` after a failed delivery already holds
    /// its certificate and no longer counts.
    pub fn awaiting_certificate(&self) -> bool {
        self.status.is_in_flight() && self.certificate_id.is_none()
    }

    /// Put a rejected or errored request back in the submission queue.
    ///
    /// This is the only way out of a failure state and is meant for
    /// operators who have fixed whatever made the CA refuse the batch.
    pub fn reset_for_resubmission(&mut self, source: &str) -> Result<(), TransitionError> {
        if !self.status.is_failure() {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: RequestState::ReadyToSubmit,
            });
        }
        self.batch_id = 0;
        self.batch_name.clear();
        self.batch_status.clear();
        self.reject_reason.clear();
        self.record(RequestState::ReadyToSubmit, "certificate request reset", source);
        Ok(())
    }

    fn record(&mut self, next: RequestState, description: &str, source: &str) {
        let now = Utc::now();
        self.audit_log.push(AuditEntry {
            timestamp: now,
            previous: self.status,
            current: next,
            description: description.to_string(),
            source: source.to_string(),
        });
        self.status = next;
        self.modified = now;
    }
}
