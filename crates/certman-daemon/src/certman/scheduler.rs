//! The manager's scheduling loop.

use std::sync::atomic::Ordering;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::{CertManError, CertManager};

/// Clears the running flag when the loop exits, however it exits.
struct RunningGuard(CertManager);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.inner.running.store(false, Ordering::SeqCst);
    }
}

impl CertManager {
    /// Spawn the loop that runs request and reissuance ticks on their
    /// intervals until `shutdown` changes.
    ///
    /// Outstanding downloads are not awaited on shutdown; call
    /// [`CertManager::wait_for_downloads`] after joining the handle.
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>, CertManError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(CertManError::AlreadyRunning);
        }
        let guard = RunningGuard(self.clone());

        Ok(tokio::spawn(async move {
            let manager = &guard.0;
            let settings = manager.settings();
            info!(
                request_interval_secs = settings.request_interval.as_secs(),
                reissuance_interval_secs = settings.reissuance_interval.as_secs(),
                "Certificate manager started"
            );

            let mut requests = tokio::time::interval(settings.request_interval);
            requests.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut reissuance = tokio::time::interval(settings.reissuance_interval);
            reissuance.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Work starts one interval after startup.
            requests.tick().await;
            reissuance.tick().await;

            loop {
                tokio::select! {
                    _ = requests.tick() => {
                        manager.handle_certificate_requests().await;
                    }
                    _ = reissuance.tick() => {
                        manager.handle_certificate_reissuance().await;
                    }
                    _ = shutdown.changed() => {
                        info!("Certificate manager shutting down");
                        return;
                    }
                }
            }
        }))
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
