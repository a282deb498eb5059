//! Connection configuration.
//!
//! Settings come from a TOML file (by default `~/.config/warren/config.toml`,
//! optional) and are overridden by command-line flags and `RABBITMQ_*`
//! environment variables.
//!
//! ```toml
//! endpoint = "http://localhost:15672"
//! username = "guest"
//! password = "guest"
//! timeout_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//! backoff_factor = 2.0
//! max_delay_ms = 10000
//! ```

use anyhow::{Context, Result, bail};
use brokeradmin::{ConnectionConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path (~/.config/warren)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("warren"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub retry: RetrySection,
}

impl Default for FileConfig {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            endpoint: defaults.endpoint,
            username: defaults.username,
            password: defaults.password,
            timeout_secs: defaults.timeout.as_secs(),
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

/// Values given on the command line (or through the environment).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<String>,
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl FileConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Load the file named by `--config`, or the default file if present.
    pub fn discover(flag: Option<&str>) -> Result<Self> {
        if let Some(path) = flag {
            let path = PathBuf::from(shellexpand::tilde(path).as_ref());
            return Self::load(&path);
        }

        let path = config_dir()?.join("config.toml");
        if path.exists() {
            log::debug!("Using config file {}", path.display());
            Self::load(&path)
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply command-line overrides and check the result.
    pub fn into_connection(self, overrides: &Overrides) -> Result<ConnectionConfig> {
        let endpoint = overrides.endpoint.clone().unwrap_or(self.endpoint);
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("endpoint must be an http(s) URL, got '{endpoint}'");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }

        Ok(ConnectionConfig {
            endpoint,
            username: overrides.username.clone().unwrap_or(self.username),
            password: overrides.password.clone().unwrap_or(self.password),
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                backoff_factor: self.retry.backoff_factor,
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
        })
    }
}

/// Resolve the connection settings for this invocation.
pub fn connection(overrides: &Overrides) -> Result<ConnectionConfig> {
    FileConfig::discover(overrides.config.as_deref())?.into_connection(overrides)
}
