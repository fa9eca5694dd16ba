//! In-process certificate authority.
//!
//! Behaves like the remote CA closely enough to drive the full pipeline:
//! batches move through the same statuses, processing counts and downloads,
//! and downloaded bundles hold real certificates signed by a local issuing
//! CA and sealed with the submitted `pkcs12Password`.
//!
//! Each instance owns its state. Tests script outcomes per batch and inject
//! one-shot call failures.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info};

use certman_crypto::bundle;
use certman_crypto::certs::{self, CaBundle, LeafRequest};

use super::{Authority, BatchInfo, CaError, CertificateAuthority, ProcessingInfo, batch_status};
use crate::profile::{ParamKey, Profile};

/// Default validity of simulated certificates.
const VALIDITY_DAYS: i64 = 365;

/// How a simulated batch resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Issued and ready for download.
    Issue,
    /// Issued, but the detail endpoint reports the batch as collected.
    Collected,
    /// One certificate issued and one failed.
    PartialFailure,
    /// Still being processed.
    Pending,
    /// Nothing active, nothing issued, nothing failed.
    Stalled,
    /// Rejected by the CA with the given reason.
    Reject(String),
    /// Failed without a reason.
    Error,
}

impl Outcome {
    fn detail_status(&self) -> &'static str {
        match self {
            Self::Issue | Self::PartialFailure => batch_status::READY_FOR_DOWNLOAD,
            Self::Collected => batch_status::COLLECTED,
            Self::Pending | Self::Stalled => batch_status::PROCESSING,
            Self::Reject(_) => batch_status::REJECTED,
            Self::Error => batch_status::FAILED,
        }
    }

    fn live_status(&self) -> &'static str {
        match self {
            Self::Collected => batch_status::READY_FOR_DOWNLOAD,
            other => other.detail_status(),
        }
    }

    const fn processing(&self) -> ProcessingInfo {
        let (active, success, failed) = match self {
            Self::Issue | Self::Collected => (0, 1, 0),
            Self::PartialFailure => (0, 1, 1),
            Self::Pending => (1, 0, 0),
            Self::Stalled => (0, 0, 0),
            Self::Reject(_) | Self::Error => (0, 0, 1),
        };
        ProcessingInfo {
            active,
            success,
            failed,
        }
    }

    fn reject_reason(&self) -> String {
        match self {
            Self::Reject(reason) => reason.clone(),
            _ => String::new(),
        }
    }
}

/// CA endpoints, for call recording and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaCall {
    CreateBatch,
    BatchDetail,
    BatchStatus,
    ProcessingInfo,
    Download,
    UserAuthorities,
    AuthorityBalance,
}

struct Batch {
    info: BatchInfo,
    outcome: Outcome,
    params: BTreeMap<String, String>,
}

struct State {
    next_batch_id: i64,
    next_order_number: i64,
    batches: HashMap<i64, Batch>,
    authorities: Vec<Authority>,
    default_outcome: Outcome,
    failures: HashMap<CaCall, String>,
    calls: Vec<CaCall>,
}

impl State {
    /// Record the call and consume any failure scheduled for it.
    fn enter(&mut self, call: CaCall) -> Result<(), CaError> {
        self.calls.push(call);
        match self.failures.remove(&call) {
            Some(message) => Err(CaError::Unavailable(message)),
            None => Ok(()),
        }
    }

    fn batch(&self, batch_id: i64) -> Result<&Batch, CaError> {
        self.batches
            .get(&batch_id)
            .ok_or_else(|| CaError::NotFound(format!("batch {batch_id}")))
    }
}

pub struct SimulatedAuthority {
    profile: Profile,
    issuer: CaBundle,
    state: Mutex<State>,
}

impl SimulatedAuthority {
    /// Create a simulator issuing under `profile`, with one authority
    /// holding a balance of 100 certificates.
    pub fn new(profile: Profile) -> Result<Self, CaError> {
        let issuer = certs::generate_ca("certman simulated")?;
        info!(profile = %profile, "Simulated certificate authority ready");
        Ok(Self {
            profile,
            issuer,
            state: Mutex::new(State {
                next_batch_id: 1,
                next_order_number: 1000,
                batches: HashMap::new(),
                authorities: vec![Authority { id: 1, balance: 100 }],
                default_outcome: Outcome::Issue,
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
        })
    }

    pub const fn profile(&self) -> Profile {
        self.profile
    }

    /// Outcome for batches created from now on.
    pub async fn set_outcome(&self, outcome: Outcome) {
        self.state.lock().await.default_outcome = outcome;
    }

    /// Change the outcome of an existing batch.
    pub async fn set_batch_outcome(&self, batch_id: i64, outcome: Outcome) -> Result<(), CaError> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| CaError::NotFound(format!("batch {batch_id}")))?;
        batch.info.status = outcome.detail_status().to_string();
        batch.info.reject_reason = outcome.reject_reason();
        batch.outcome = outcome;
        Ok(())
    }

    pub async fn set_authorities(&self, authorities: Vec<Authority>) {
        self.state.lock().await.authorities = authorities;
    }

    /// Fail the next call to `call` with an unavailable error.
    pub async fn fail_next(&self, call: CaCall, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(call, message.to_string());
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<CaCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.batches.len()
    }

    /// Parameters submitted with a batch.
    pub async fn submitted_params(&self, batch_id: i64) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .await
            .batches
            .get(&batch_id)
            .map(|b| b.params.clone())
    }

    fn leaf_request(params: &BTreeMap<String, String>) -> LeafRequest {
        let get = |key: ParamKey| params.get(key.as_str()).cloned();
        let mut serial = vec![0u8; 8];
        rand::thread_rng().fill_bytes(&mut serial);
        // Positive and minimal as DER.
        serial[0] = (serial[0] & 0x7F) | 0x10;

        LeafRequest {
            common_name: get(ParamKey::CommonName).unwrap_or_default(),
            dns_names: get(ParamKey::DnsName)
                .map(|names| names.lines().map(str::to_string).collect())
                .unwrap_or_default(),
            organization: get(ParamKey::OrganizationName),
            locality: get(ParamKey::LocalityName),
            province: get(ParamKey::StateOrProvinceName),
            country: get(ParamKey::CountryName),
            serial,
            validity_days: VALIDITY_DAYS,
        }
    }
}

impl std::fmt::Debug for SimulatedAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedAuthority")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CertificateAuthority for SimulatedAuthority {
    async fn create_single_cert_batch(
        &self,
        authority: i64,
        batch_name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<BatchInfo, CaError> {
        let mut state = self.state.lock().await;
        state.enter(CaCall::CreateBatch)?;

        for key in self.profile.required_params() {
            if params.get(key.as_str()).is_none_or(String::is_empty) {
                return Err(CaError::Request(format!(
                    "profile {} requires {}",
                    self.profile,
                    key.as_str()
                )));
            }
        }

        let account = state
            .authorities
            .iter_mut()
            .find(|a| a.id == authority)
            .ok_or_else(|| CaError::NotFound(format!("authority {authority}")))?;
        if account.balance <= 0 {
            return Err(CaError::Request(format!(
                "authority {authority} has no balance"
            )));
        }
        account.balance -= 1;

        let outcome = state.default_outcome.clone();
        let info = BatchInfo {
            batch_id: state.next_batch_id,
            batch_name: batch_name.to_string(),
            status: outcome.detail_status().to_string(),
            reject_reason: outcome.reject_reason(),
            order_number: state.next_order_number,
            creation_date: Utc::now().to_rfc3339(),
            profile: self.profile.name().to_string(),
        };
        state.next_batch_id += 1;
        state.next_order_number += 1;
        state.batches.insert(
            info.batch_id,
            Batch {
                info: info.clone(),
                outcome,
                params: params.clone(),
            },
        );

        debug!(batch_id = info.batch_id, batch_name, "Simulated batch created");
        Ok(info)
    }

    async fn batch_detail(&self, batch_id: i64) -> Result<BatchInfo, CaError> {
        let mut state = self.state.lock().await;
        state.enter(CaCall::BatchDetail)?;
        Ok(state.batch(batch_id)?.info.clone())
    }

    async fn batch_status(&self, batch_id: i64) -> Result<String, CaError> {
        let mut state = self.state.lock().await;
        state.enter(CaCall::BatchStatus)?;
        Ok(state.batch(batch_id)?.outcome.live_status().to_string())
    }

    async fn processing_info(&self, batch_id: i64) -> Result<ProcessingInfo, CaError> {
        let mut state = self.state.lock().await;
        state.enter(CaCall::ProcessingInfo)?;
        Ok(state.batch(batch_id)?.outcome.processing())
    }

    async fn download(&self, batch_id: i64, dir: &Path) -> Result<PathBuf, CaError> {
        let (name, params) = {
            let mut state = self.state.lock().await;
            state.enter(CaCall::Download)?;
            let batch = state.batch(batch_id)?;
            if batch.outcome.processing().success == 0 {
                return Err(CaError::Request(format!(
                    "batch {batch_id} has no issued certificates"
                )));
            }
            (batch.info.batch_name.clone(), batch.params.clone())
        };

        let password = params
            .get(ParamKey::Pkcs12Password.as_str())
            .cloned()
            .unwrap_or_default();
        let issued = certs::issue_leaf(&self.issuer, &Self::leaf_request(&params))?;
        let sealed = bundle::seal(&issued.to_pem_bundle(), &password)?;

        let path = dir.join(format!("{name}.bundle"));
        tokio::fs::write(&path, sealed).await?;

        debug!(batch_id, path = %path.display(), "Simulated batch downloaded");
        Ok(path)
    }

    async fn user_authorities(&self) -> Result<Vec<Authority>, CaError> {
        let mut state = self.state.lock().await;
        state.enter(CaCall::UserAuthorities)?;
        Ok(state.authorities.clone())
    }

    async fn authority_available_balance(&self, authority_id: i64) -> Result<i64, CaError> {
        let mut state = self.state.lock().await;
        state.enter(CaCall::AuthorityBalance)?;
        state
            .authorities
            .iter()
            .find(|a| a.id == authority_id)
            .map(|a| a.balance)
            .ok_or_else(|| CaError::NotFound(format!("authority {authority_id}")))
    }
}
