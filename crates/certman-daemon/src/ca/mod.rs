//! Certificate authority client seam.
//!
//! The manager talks to the CA through [`CertificateAuthority`]. Batches are
//! the CA's unit of work; every request is submitted as a batch holding a
//! single certificate.

pub mod simulator;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use certman_crypto::CryptoError;

pub use simulator::{CaCall, Outcome, SimulatedAuthority};

/// Batch statuses reported by the CA.
pub mod batch_status {
    pub const FAILED: &str = "FAILED";
    pub const REJECTED: &str = "REJECTED";
    pub const PROCESSING: &str = "PROCESSING";
    pub const NOT_ACCEPTABLE: &str = "NOT_ACCEPTABLE";
    pub const READY_FOR_DOWNLOAD: &str = "READY_FOR_DOWNLOAD";
    pub const COLLECTED: &str = "COLLECTED";

    /// Batch detail statuses that do not reflect processing progress and
    /// must be re-read from the status endpoint.
    pub fn is_stale(status: &str) -> bool {
        status.is_empty() || status == COLLECTED
    }
}

/// Batch metadata returned on creation and by the detail endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInfo {
    pub batch_id: i64,
    pub batch_name: String,
    pub status: String,
    pub reject_reason: String,
    pub order_number: i64,
    pub creation_date: String,
    pub profile: String,
}

/// Per-batch certificate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingInfo {
    pub active: i64,
    pub success: i64,
    pub failed: i64,
}

/// An issuing authority the account may draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
    pub id: i64,
    pub balance: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("CA request failed: {0}")]
    Request(String),

    #[error("CA resource not found: {0}")]
    NotFound(String),

    #[error("CA unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl From<std::io::Error> for CaError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<CryptoError> for CaError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e.to_string())
    }
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Submit a batch with one certificate described by `params`.
    async fn create_single_cert_batch(
        &self,
        authority: i64,
        batch_name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<BatchInfo, CaError>;

    async fn batch_detail(&self, batch_id: i64) -> Result<BatchInfo, CaError>;

    /// Current processing status, bypassing cached batch detail.
    async fn batch_status(&self, batch_id: i64) -> Result<String, CaError>;

    async fn processing_info(&self, batch_id: i64) -> Result<ProcessingInfo, CaError>;

    /// Download the batch bundle into `dir`, returning the written file.
    async fn download(&self, batch_id: i64, dir: &Path) -> Result<PathBuf, CaError>;

    async fn user_authorities(&self) -> Result<Vec<Authority>, CaError>;

    async fn authority_available_balance(&self, authority_id: i64) -> Result<i64, CaError>;
}
