//! certman daemon
//!
//! Runs the certificate manager: request pipeline ticks and reissuance
//! scans on their configured intervals until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use certman_core::config::{self, Config};
use certman_daemon::ca::SimulatedAuthority;
use certman_daemon::certman::{CertManager, Collaborators, Settings};
use certman_daemon::courier::CourierClient;
use certman_daemon::notify::{EmailManager, LogMailer, Mailbox, Mailer, SendGridMailer};
use certman_daemon::storage::Database;
use certman_daemon::whisper::WhisperClient;

#[derive(Parser, Debug)]
#[command(name = "certman-daemon")]
#[command(version, about = "certman daemon - certificate issuance and reissuance")]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, env = "CERTMAN_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, env = "CERTMAN_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CERTMAN_LOG_JSON")]
    log_json: bool,

    /// Run one request tick and one reissuance scan, wait for downloads, then exit.
    #[arg(long)]
    once: bool,

    /// Move a rejected or errored certificate request back to the submission queue and exit.
    #[arg(long, value_name = "REQUEST_ID")]
    resubmit: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::load_config(args.config.as_deref())?;

    let level = args.log_level.as_deref().unwrap_or(&config.daemon.log_level);
    certman_core::tracing_init::init_tracing(
        &certman_core::tracing_init::default_filter("certman-daemon", level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        profile = %config.certman.profile,
        directory_id = %config.certman.directory_id,
        "Starting certman-daemon"
    );

    if !config.certman.enabled {
        info!("Certificate manager is disabled");
        return Ok(());
    }
    if !config.certman.testing {
        anyhow::bail!("no CA client is configured; set certman.testing to use the simulated CA");
    }

    let db_path = match args.db_path.clone().or_else(|| config.daemon.database_path.clone()) {
        Some(path) => path,
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let manager = build_manager(&config, db.clone())?;

    if let Some(request_id) = &args.resubmit {
        manager.resubmit_request(request_id, "certman-daemon").await?;
        db.close().await;
        return Ok(());
    }

    if args.once {
        let report = manager.handle_certificate_requests().await;
        let actions = manager.handle_certificate_reissuance().await;
        let downloads = manager.wait_for_downloads().await;
        info!(
            submitted = report.submitted,
            checked = report.checked,
            failed = report.failed,
            rejected = report.rejected,
            registrants = actions.len(),
            downloads = downloads.len(),
            "Single pass complete"
        );
        db.close().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = manager.spawn(shutdown_rx)?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        warn!(error = %e, "Certificate manager task failed");
    }
    let downloads = manager.wait_for_downloads().await;
    info!(downloads = downloads.len(), "Outstanding downloads finished");

    db.close().await;
    info!("Daemon stopped");
    Ok(())
}

fn build_manager(config: &Config, db: Database) -> anyhow::Result<CertManager> {
    let settings = Settings::from_config(&config.certman)?;
    let ca = SimulatedAuthority::new(settings.profile)?;

    let sender = Mailbox::parse(&config.email.service_email)?;
    let mailer: Arc<dyn Mailer> = match &config.email.sendgrid_api_key {
        Some(key) => Arc::new(SendGridMailer::new(&config.email.sendgrid_url, key, sender)?),
        None => {
            warn!("No SendGrid API key configured; emails will only be logged");
            Arc::new(LogMailer)
        }
    };
    let admin = Mailbox::parse(&config.email.admin_email)?;
    let linker = WhisperClient::new(&config.whisper.endpoint)?;
    let courier = CourierClient::new(config.certman.delivery_timeout())?;

    let store = Arc::new(db);
    Ok(CertManager::new(
        settings,
        Collaborators {
            store: store.clone(),
            secrets: store,
            ca: Arc::new(ca),
            notifier: Arc::new(EmailManager::new(mailer, admin)),
            linker: Arc::new(linker),
            courier: Arc::new(courier),
        },
    )?)
}

/// Default database path: `$XDG_CONFIG_HOME/certman/certman.db`, else `~/.certman/certman.db`.
fn default_db_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = config::database_path() {
        return Ok(path);
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".certman").join("certman.db"))
}
