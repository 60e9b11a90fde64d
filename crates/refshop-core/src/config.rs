//! Application and client configuration.
//!
//! `Config` is the persisted application configuration stored at
//! `~/.config/refshop/config.json`. `ClientConfig` is the runtime view the
//! session client is built from: endpoints, allow-list, entry surfaces and
//! timeouts.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "refshop";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "REFSHOP_API_URL";

/// Base URL used when neither the config file nor the environment sets one
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a single renewal call. A hung renewal endpoint would
/// otherwise hold every queued request indefinitely.
const DEFAULT_RENEWAL_TIMEOUT_SECS: u64 = 30;

pub const LOGIN_PATH: &str = "/api/users/login/";
pub const REGISTER_PATH: &str = "/api/users/register/";
pub const RENEWAL_PATH: &str = "/api/token/refresh/";
pub const PROFILE_PATH: &str = "/api/users/userinfo/";
pub const LOGIN_SURFACE: &str = "/login";
pub const SIGNUP_SURFACE: &str = "/signup";

/// Where credentials are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file in the cache directory
    EncryptedFile,
    /// Nothing survives the process
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_identifier: Option<String>,
    #[serde(default)]
    pub storage: StorageKind,
    pub request_timeout_secs: Option<u64>,
    pub renewal_timeout_secs: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Effective API base URL: environment, then config file, then default
    pub fn api_base_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new(self.api_base_url());
        if let Some(secs) = self.request_timeout_secs {
            client.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.renewal_timeout_secs {
            client.renewal_timeout = Duration::from_secs(secs);
        }
        client
    }
}

/// Runtime configuration of a `SessionClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub login_path: String,
    pub register_path: String,
    pub renewal_path: String,
    /// Endpoints that never carry a bearer credential and never trigger renewal
    pub allow_list: Vec<String>,
    /// Navigation contexts where a 401 is reported as-is
    pub entry_surfaces: Vec<String>,
    /// Where the application is sent when the session is lost
    pub session_lost_redirect: String,
    pub request_timeout: Duration,
    pub renewal_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            login_path: LOGIN_PATH.to_string(),
            register_path: REGISTER_PATH.to_string(),
            renewal_path: RENEWAL_PATH.to_string(),
            allow_list: vec![
                LOGIN_PATH.to_string(),
                REGISTER_PATH.to_string(),
                RENEWAL_PATH.to_string(),
            ],
            entry_surfaces: vec![LOGIN_SURFACE.to_string(), SIGNUP_SURFACE.to_string()],
            session_lost_redirect: LOGIN_SURFACE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            renewal_timeout: Duration::from_secs(DEFAULT_RENEWAL_TIMEOUT_SECS),
        }
    }

    pub fn with_renewal_timeout(mut self, timeout: Duration) -> Self {
        self.renewal_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}
