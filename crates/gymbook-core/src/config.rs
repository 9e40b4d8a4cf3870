//! Application configuration management.
//!
//! Configuration is stored at `~/.config/gymbook/config.json` and can be
//! overridden per process with `GYMBOOK_BASE_URL` / `GYMBOOK_TIMEOUT_SECS`.
//! [`PipelineConfig`] is the runtime subset handed to the request pipeline.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config directory paths
pub const APP_NAME: &str = "gymbook";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted credential file name (used by the `EncryptedFile` backend)
const CREDENTIAL_FILE: &str = "credentials.bin";

const DEFAULT_BASE_URL: &str = "https://api.gymbook.app";

/// HTTP request timeout in seconds.
/// Applies to every call, including the refresh call.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Maximum retries for failed idempotent reads (network / server errors).
const DEFAULT_MAX_READ_RETRIES: u32 = 2;

/// Initial backoff delay in milliseconds, doubled after each retry.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

const ENV_BASE_URL: &str = "GYMBOOK_BASE_URL";
const ENV_TIMEOUT_SECS: &str = "GYMBOOK_TIMEOUT_SECS";

/// Where the credential and session blob are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// OS keychain via the keyring crate
    #[default]
    Keyring,
    /// ChaCha20-Poly1305 encrypted file in the config directory
    EncryptedFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_read_retries: u32,
    pub initial_backoff_ms: u64,
    pub storage: StorageBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            storage: StorageBackend::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load config from disk (defaults if absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn credential_file(&self) -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CREDENTIAL_FILE))
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_read_retries: self.max_read_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }
}

/// Construction-time settings for the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_read_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Config::default().pipeline()
    }
}

impl PipelineConfig {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout,
            ..Self::default()
        }
    }
}
