//! Configuration resolution for certman.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/certman/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`CERTMAN_*`)
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete certman configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub certman: CertManConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Certificate manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertManConfig {
    /// When false the manager is not started at all.
    pub enabled: bool,
    /// Seconds between certificate request pipeline ticks.
    pub request_interval_secs: u64,
    /// Seconds between reissuance scans.
    pub reissuance_interval_secs: u64,
    /// Directory for downloaded bundles. A temporary directory is used when unset.
    pub storage: Option<PathBuf>,
    /// Prefix used when naming CA batches.
    pub directory_id: String,
    /// Name or numeric id of the CA issuance profile.
    pub profile: String,
    /// Use the in-process simulated authority.
    pub testing: bool,
    /// Webhook delivery retries after the first attempt.
    pub delivery_retries: u32,
    /// Milliseconds before the first webhook retry; doubles per retry.
    pub delivery_backoff_ms: u64,
    /// Seconds before a single webhook request times out.
    pub delivery_timeout_secs: u64,
}

impl Default for CertManConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_interval_secs: 10 * 60,
            reissuance_interval_secs: 24 * 60 * 60,
            storage: None,
            directory_id: "certman".to_string(),
            profile: "CipherTrace EE".to_string(),
            testing: true,
            delivery_retries: 5,
            delivery_backoff_ms: 1000,
            delivery_timeout_secs: 30,
        }
    }
}

impl CertManConfig {
    pub const fn request_interval(&self) -> Duration {
        Duration::from_secs(self.request_interval_secs)
    }

    pub const fn reissuance_interval(&self) -> Duration {
        Duration::from_secs(self.reissuance_interval_secs)
    }

    pub const fn delivery_backoff(&self) -> Duration {
        Duration::from_millis(self.delivery_backoff_ms)
    }

    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

/// Outgoing email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Sender address for every message.
    pub service_email: String,
    /// Recipient of administrative notices.
    pub admin_email: String,
    /// SendGrid API key; messages are only logged when unset.
    pub sendgrid_api_key: Option<String>,
    /// SendGrid mail send endpoint.
    pub sendgrid_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            service_email: "certman <certman@localhost>".to_string(),
            admin_email: "admin@localhost".to_string(),
            sendgrid_api_key: None,
            sendgrid_url: "https://api.sendgrid.com/v3/mail/send".to_string(),
        }
    }
}

/// One-time secret link service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub endpoint: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://whisper.rotational.dev".to_string(),
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.certman.request_interval_secs == 0 {
            return Err(Error::Config("request_interval_secs must be positive".into()));
        }
        if self.certman.reissuance_interval_secs == 0 {
            return Err(Error::Config(
                "reissuance_interval_secs must be positive".into(),
            ));
        }
        if self.certman.delivery_timeout_secs == 0 {
            return Err(Error::Config("delivery_timeout_secs must be positive".into()));
        }
        if self.certman.directory_id.trim().is_empty() {
            return Err(Error::Config("directory_id must not be empty".into()));
        }
        if self.certman.profile.trim().is_empty() {
            return Err(Error::Config("profile must not be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    // An explicit file must exist; the global one is optional.
    if let Some(path) = explicit {
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path for the daemon.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("certman.db"))
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("certman"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `CERTMAN_*` overrides using the given variable lookup.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("CERTMAN_REQUEST_INTERVAL").and_then(|v| v.parse().ok()) {
        config.certman.request_interval_secs = n;
    }
    if let Some(n) = lookup("CERTMAN_REISSUANCE_INTERVAL").and_then(|v| v.parse().ok()) {
        config.certman.reissuance_interval_secs = n;
    }
    if let Some(n) = lookup("CERTMAN_DELIVERY_RETRIES").and_then(|v| v.parse().ok()) {
        config.certman.delivery_retries = n;
    }
    if let Some(val) = lookup("CERTMAN_ENABLED") {
        config.certman.enabled = matches!(val.as_str(), "1" | "true" | "yes");
    }
    if let Some(val) = lookup("CERTMAN_STORAGE") {
        config.certman.storage = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("CERTMAN_DIRECTORY_ID") {
        config.certman.directory_id = val;
    }
    if let Some(val) = lookup("CERTMAN_PROFILE") {
        config.certman.profile = val;
    }
    if let Some(val) = lookup("CERTMAN_ADMIN_EMAIL") {
        config.email.admin_email = val;
    }
    if let Some(val) = lookup("CERTMAN_SERVICE_EMAIL") {
        config.email.service_email = val;
    }
    if let Some(val) = lookup("SENDGRID_API_KEY") {
        config.email.sendgrid_api_key = Some(val);
    }
    if let Some(val) = lookup("CERTMAN_WHISPER_URL") {
        config.whisper.endpoint = val;
    }
    if let Some(val) = lookup("CERTMAN_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
}
