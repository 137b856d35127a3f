use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::freshness::DEVICE_SECURITY_SERVICE_TYPE;

/// Prefix of environment overrides, e.g. `UPNP_SECURITY_ACL_CAPACITY=20`
/// or `UPNP_SECURITY_LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "UPNP_SECURITY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSecurityConfig {
    pub acl_capacity: usize,
    pub owner_list_capacity: usize,
    pub cert_cache_capacity: usize,
    pub rsa_key_bits: usize,
    /// Device type prefix of the `mfgr` namespace in permission documents.
    pub permissions_namespace: String,
    /// PKCS#8 PEM file holding the device key; generated when missing.
    pub device_key_file: Option<PathBuf>,
    /// Directory for the persisted owner list and ACL.
    pub state_dir: Option<PathBuf>,
    /// Pre-provisioned ownership secret in security ID notation.
    pub device_secret: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for DeviceSecurityConfig {
    fn default() -> Self {
        Self {
            acl_capacity: 50,
            owner_list_capacity: 5,
            cert_cache_capacity: 100,
            rsa_key_bits: 1024,
            permissions_namespace: DEVICE_SECURITY_SERVICE_TYPE.to_string(),
            device_key_file: None,
            state_dir: None,
            device_secret: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Write daily rolling log files here instead of stdout.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "upnp-security.log".to_string(),
        }
    }
}

impl DeviceSecurityConfig {
    /// Defaults, overlaid with `path` (TOML) if given, overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    /// Configured state directory, falling back to the platform data directory.
    pub fn resolved_state_dir(&self) -> Option<PathBuf> {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("upnp-device-security")))
    }
}
