//! Certificate manager.
//!
//! Drives certificate requests through the CA pipeline and reissues
//! identity certificates before they expire:
//!
//! - **Submission**: `READY_TO_SUBMIT` requests become single-certificate CA batches
//! - **Status checks**: `PROCESSING` requests follow their batch until it resolves
//! - **Downloads**: issued bundles are stored, parsed and delivered in background tasks
//! - **Reissuance**: verified registrants are reminded and reissued ahead of expiry
//!
//! Requests are never locked; a request is only picked up from the one state
//! its stage owns, so repeated ticks cannot submit it twice.

mod download;
mod reissue;
mod scheduler;
mod status;
mod submit;
mod webhook;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use certman_core::config::CertManConfig;
use certman_crypto::CryptoError;

use crate::ca::{CaError, CertificateAuthority};
use crate::courier::{Courier, DeliveryBackoff};
use crate::models::{CertificateRequest, RequestState, TransitionError};
use crate::notify::{Notifier, NotifyError};
use crate::profile::{Profile, ProfileError};
use crate::secrets::{SecretError, SecretStore};
use crate::storage::{Cursor, DatabaseError, Store};
use crate::whisper::{SecretLinker, WhisperError};

pub use download::DownloadReport;
pub use reissue::ReissuanceAction;
pub use status::CheckOutcome;
pub use submit::SubmitOutcome;

/// Errors raised while processing a single request or registrant.
#[derive(Debug, thiserror::Error)]
pub enum CertManError {
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Secret link error: {0}")]
    Whisper(#[from] WhisperError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("State error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Certificate storage error: {0}")]
    CertStorage(String),

    #[error("No authority with available balance")]
    NoAuthority,

    #[error("Certificate request {0} has no batch id")]
    MissingBatch(String),

    #[error("Certificate manager is already running")]
    AlreadyRunning,

    #[error("Task failed: {0}")]
    Task(String),
}

/// Manager settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub request_interval: Duration,
    pub reissuance_interval: Duration,
    pub storage: Option<PathBuf>,
    pub directory_id: String,
    pub profile: Profile,
    pub delivery: DeliveryBackoff,
}

impl Settings {
    pub fn from_config(config: &CertManConfig) -> Result<Self, CertManError> {
        Ok(Self {
            request_interval: config.request_interval(),
            reissuance_interval: config.reissuance_interval(),
            storage: config.storage.clone(),
            directory_id: config.directory_id.clone(),
            profile: config.profile.parse()?,
            delivery: DeliveryBackoff {
                initial_delay: config.delivery_backoff(),
                max_retries: config.delivery_retries,
                ..DeliveryBackoff::default()
            },
        })
    }
}

/// Services the manager depends on.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub secrets: Arc<dyn SecretStore>,
    pub ca: Arc<dyn CertificateAuthority>,
    pub notifier: Arc<dyn Notifier>,
    pub linker: Arc<dyn SecretLinker>,
    pub courier: Arc<dyn Courier>,
}

/// Directory that downloaded bundles are written to.
///
/// Either the configured directory or a temporary one removed on drop.
#[derive(Debug)]
pub struct CertStorage {
    path: PathBuf,
    _temp: Option<TempDir>,
}

impl CertStorage {
    pub fn open(configured: Option<&Path>) -> Result<Self, CertManError> {
        let Some(path) = configured else {
            let temp = tempfile::Builder::new()
                .prefix("certman_certs")
                .tempdir()
                .map_err(|e| CertManError::CertStorage(e.to_string()))?;
            return Ok(Self {
                path: temp.path().to_path_buf(),
                _temp: Some(temp),
            });
        };

        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CertManError::CertStorage(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(path).map_err(|e| {
                    CertManError::CertStorage(format!("{}: {e}", path.display()))
                })?;
            }
            Err(e) => {
                return Err(CertManError::CertStorage(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            _temp: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Requests picked up by one request tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: usize,
    pub checked: usize,
    pub failed: usize,
    /// Requests that ended rejected or errored during the tick.
    pub rejected: usize,
    /// Downloads started by status checks.
    pub downloading: usize,
}

impl TickReport {
    fn record(&mut self, advanced: Advanced) {
        match advanced {
            Advanced::Submit(SubmitOutcome::Rejected)
            | Advanced::Check(
                CheckOutcome::Rejected | CheckOutcome::Errored | CheckOutcome::RegistrantChanged,
            ) => self.rejected += 1,
            Advanced::Check(CheckOutcome::Downloading) => self.downloading += 1,
            Advanced::Submit(SubmitOutcome::Submitted { .. })
            | Advanced::Check(CheckOutcome::Pending | CheckOutcome::Unhandled) => {}
        }
    }
}

/// What one request task did.
enum Advanced {
    Submit(SubmitOutcome),
    Check(CheckOutcome),
}

struct Inner {
    settings: Settings,
    store: Arc<dyn Store>,
    secrets: Arc<dyn SecretStore>,
    ca: Arc<dyn CertificateAuthority>,
    notifier: Arc<dyn Notifier>,
    linker: Arc<dyn SecretLinker>,
    courier: Arc<dyn Courier>,
    storage: CertStorage,
    downloads: Mutex<JoinSet<DownloadReport>>,
    running: AtomicBool,
}

/// Cheaply cloneable handle to the certificate manager.
#[derive(Clone)]
pub struct CertManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertManager")
            .field("settings", &self.inner.settings)
            .field("storage", &self.inner.storage.path)
            .finish_non_exhaustive()
    }
}

impl CertManager {
    pub fn new(settings: Settings, services: Collaborators) -> Result<Self, CertManError> {
        let storage = CertStorage::open(settings.storage.as_deref())?;
        info!(
            storage = %storage.path().display(),
            profile = %settings.profile,
            directory_id = %settings.directory_id,
            "Certificate manager created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                store: services.store,
                secrets: services.secrets,
                ca: services.ca,
                notifier: services.notifier,
                linker: services.linker,
                courier: services.courier,
                storage,
                downloads: Mutex::new(JoinSet::new()),
                running: AtomicBool::new(false),
            }),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Run one request tick: submit ready requests and check processing ones.
    ///
    /// Every request gets its own task; the tick returns once all of them
    /// finish. Downloads started by status checks keep running afterwards.
    pub async fn handle_certificate_requests(&self) -> TickReport {
        self.reap_downloads().await;

        let mut report = TickReport::default();
        let mut tasks = JoinSet::new();
        let mut cursor = Cursor::<CertificateRequest>::new(self.inner.store.as_ref());

        while let Some(item) = cursor.next().await {
            let request = match item {
                Ok(request) => request,
                Err(e) => {
                    error!(error = %e, "Could not read certificate request");
                    report.failed += 1;
                    continue;
                }
            };

            let manager = self.clone();
            match request.status {
                RequestState::ReadyToSubmit => {
                    report.submitted += 1;
                    tasks.spawn(async move {
                        let id = request.id.clone();
                        manager
                            .submit_request(request)
                            .await
                            .map(Advanced::Submit)
                            .map_err(|e| (id, e))
                    });
                }
                RequestState::Processing => {
                    report.checked += 1;
                    tasks.spawn(async move {
                        let id = request.id.clone();
                        manager
                            .check_request(request)
                            .await
                            .map(Advanced::Check)
                            .map_err(|e| (id, e))
                    });
                }
                _ => {}
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(advanced)) => report.record(advanced),
                Ok(Err((request_id, e))) => {
                    warn!(request_id = %request_id, error = %e, "Certificate request not advanced");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Certificate request task panicked");
                    report.failed += 1;
                }
            }
        }

        debug!(
            submitted = report.submitted,
            checked = report.checked,
            failed = report.failed,
            rejected = report.rejected,
            downloading = report.downloading,
            "Certificate request tick complete"
        );
        report
    }

    /// Put a rejected or errored request back in the submission queue.
    pub async fn resubmit_request(
        &self,
        request_id: &str,
        source: &str,
    ) -> Result<(), CertManError> {
        let mut request = self.inner.store.retrieve_request(request_id).await?;
        request.reset_for_resubmission(source)?;
        self.inner.store.update_request(&request).await?;
        info!(request_id, source, "Certificate request reset for resubmission");
        Ok(())
    }
}
