//! Configuration loading.
//!
//! Settings live in `config.json` under the platform configuration directory
//! and can be overridden with `UCWA_*` environment variables. Credentials are
//! never part of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, UcwaError};

/// Client configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Discovery URL template; `{domain}` is replaced by the username's domain.
    pub discovery_url: String,
    /// Verify server TLS certificates. Only disable against test servers.
    pub verify_tls: bool,
    /// Culture sent on application registration.
    pub culture: String,
    /// User agent sent on application registration.
    pub user_agent: String,
    /// Timeout in seconds for ordinary requests.
    pub request_timeout_secs: u64,
    /// Timeout in seconds for the events long poll.
    pub poll_timeout_secs: u64,
    /// Maximum handshake restarts caused by domain reconciliation.
    pub max_login_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_url: constants::DEFAULT_DISCOVERY_URL.to_string(),
            verify_tls: true,
            culture: constants::DEFAULT_CULTURE.to_string(),
            user_agent: constants::user_agent(),
            request_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            poll_timeout_secs: constants::EVENT_POLL_TIMEOUT.as_secs(),
            max_login_attempts: constants::DEFAULT_MAX_LOGIN_ATTEMPTS,
        }
    }
}

impl Config {
    /// Returns the configuration directory.
    ///
    /// `UCWA_CONFIG_DIR` wins over the platform config dir.
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(dir) = env::var("UCWA_CONFIG_DIR") {
            return Some(PathBuf::from(dir));
        }
        dirs::config_dir().map(|d| d.join("lyncbot"))
    }

    /// Loads `config.json` from [`Config::config_dir`] (defaults if absent)
    /// and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_dir().map(|d| d.join("config.json")) {
            Some(path) if path.exists() => Self::load_from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads a configuration file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            UcwaError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_login_attempts == 0 {
            return Err(UcwaError::Config(
                "max_login_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("UCWA_DISCOVERY_URL") {
            self.discovery_url = url;
        }

        if let Ok(verify) = env::var("UCWA_VERIFY_TLS") {
            self.verify_tls = !matches!(verify.as_str(), "0" | "false" | "no");
        }

        if let Ok(timeout) = env::var("UCWA_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.request_timeout_secs = secs;
            }
        }

        if let Ok(timeout) = env::var("UCWA_POLL_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.poll_timeout_secs = secs;
            }
        }
    }

    /// Discovery URL for a username like `alice@example.com`.
    pub fn discovery_url_for(&self, username: &str) -> String {
        let domain = username.split_once('@').map_or(username, |(_, d)| d);
        self.discovery_url.replace("{domain}", domain)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Long-poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}
