//! User-level settings
//!
//! Settings live in `<config dir>/ksapp/config.yaml`. Resolution order:
//! 1. explicit path (CLI `--config`)
//! 2. `KSAPP_CONFIG` environment variable
//! 3. platform config directory
//!
//! A missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable pointing at an alternate settings file
pub const CONFIG_ENV_VAR: &str = "KSAPP_CONFIG";

/// Registry used when a descriptor names none
pub const DEFAULT_REGISTRY_NAME: &str = "incubator";

/// Default chart index cache TTL (15 minutes)
pub const DEFAULT_INDEX_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub cache: CacheSettings,
    pub default_registry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub index_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            cache: CacheSettings::default(),
            default_registry: DEFAULT_REGISTRY_NAME.to_string(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("ksapp/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            index_ttl_secs: DEFAULT_INDEX_TTL_SECS,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheSettings {
    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_secs)
    }
}

impl Settings {
    /// Load settings, honoring an explicit override path first
    pub fn load(cli_override: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_override {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "settings file does not exist: {}",
                    path.display()
                )));
            }
            return Self::load_from_path(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            if !env_path.is_empty() {
                debug!("Using settings from {}={}", CONFIG_ENV_VAR, env_path);
                return Self::load_from_path(Path::new(&env_path));
            }
        }

        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from a specific path, falling back to defaults if absent
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
        serde_yaml_ng::from_str(&content).map_err(|e| Error::parse(path, e))
    }

    /// Platform settings path (e.g. `~/.config/ksapp/config.yaml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "ksonnet", "ksapp")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }
}
