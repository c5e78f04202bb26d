//! Configuration management for the review session engine

use crate::error::{ReviewError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables with this prefix overlay file values,
/// e.g. `MTR__AUTOSAVE__INTERVAL_SECS=10`.
pub const ENV_PREFIX: &str = "MTR";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub autosave: AutosaveConfig,

    #[serde(default)]
    pub permissions: PermissionConfig,
}

/// Which persistence gateway backs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    #[default]
    File,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub kind: GatewayKind,

    #[serde(alias = "url", default)]
    pub base_url: Option<String>,

    #[serde(alias = "token", default)]
    pub api_token: Option<String>,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// 0 disables the bound on gateway calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::default(),
            base_url: None,
            api_token: None,
            data_dir: default_data_dir(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_autosave_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
}

impl AutosaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_autosave_interval_secs(),
            teardown_grace_ms: default_teardown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<String>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            allowed_roles: default_allowed_roles(),
        }
    }
}

// Default functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/reviews")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_autosave_interval_secs() -> u64 {
    30
}

fn default_teardown_grace_ms() -> u64 {
    2000
}

fn default_role() -> String {
    "pharmacist".to_string()
}

fn default_allowed_roles() -> Vec<String> {
    vec!["pharmacist".to_string(), "admin".to_string()]
}

impl ReviewConfig {
    /// Load configuration from a JSON file, overlaid with `MTR__*` environment variables
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReviewError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ReviewError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| ReviewError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReviewError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.gateway.kind == GatewayKind::Rest {
            let missing = self
                .gateway
                .base_url
                .as_deref()
                .map(|u| u.trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ReviewError::Config(
                    "gateway.base_url is required for the rest gateway".to_string(),
                ));
            }
        }

        if self.autosave.interval_secs == 0 {
            return Err(ReviewError::Config(
                "autosave.interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.permissions.role.trim().is_empty() {
            return Err(ReviewError::Config("permissions.role is required".to_string()));
        }

        Ok(())
    }
}
