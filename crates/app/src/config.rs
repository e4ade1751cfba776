//! Portal configuration
//!
//! Read from `campus.toml` in the data directory, or from the file named by
//! `CAMPUS_CONFIG`. Every field has a default, so a missing file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use campus_core::identity::DEFAULT_ADMIN_CREDENTIAL;
use campus_core::LoginPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "CAMPUS_CONFIG";

pub const CONFIG_FILE: &str = "campus.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Credential that logs in as admin and skips the digit check
    pub admin_credential: String,
    /// Initial load window of a room, in days
    pub lookback_days: u32,
    /// Admin purge removes messages older than this, in days
    pub purge_after_days: u32,
    pub request_timeout_ms: u64,
    pub presence_heartbeat_secs: u64,
    pub presence_staleness_secs: u64,
    pub feed: FeedConfig,
    /// Defaults to `campus.db` in the data directory
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Serve this process's change feed to other clients
    pub listen_port: Option<u16>,
    /// Relay to join, as `host:port`
    pub upstream: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            admin_credential: DEFAULT_ADMIN_CREDENTIAL.to_string(),
            lookback_days: 2,
            purge_after_days: 7,
            request_timeout_ms: 10_000,
            presence_heartbeat_secs: 30,
            presence_staleness_secs: 120,
            feed: FeedConfig::default(),
            database_path: None,
        }
    }
}

impl PortalConfig {
    /// Load from `CAMPUS_CONFIG` if set, else from `data_dir/campus.toml`
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => data_dir.join(CONFIG_FILE),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn login_policy(&self) -> LoginPolicy {
        LoginPolicy::new(self.admin_credential.clone())
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.lookback_days))
    }

    pub fn purge_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.purge_after_days))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.presence_heartbeat_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.presence_staleness_secs)
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir.join("campus.db"))
    }
}
