//! Configuration for the keystore.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cipher::KdfParams;
use crate::throttle::{ThrottleConfig, MAX_LOCKOUT_SECS};

/// Launcher keystore configuration, read from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Directory holding one encrypted entry per account
    #[serde(default = "default_keystore_dir")]
    pub keystore_dir: PathBuf,

    /// Cost parameters for newly written entries. A `[kdf]` table must list
    /// every field.
    #[serde(default)]
    pub kdf: KdfParams,

    /// Failed unlock lockout policy
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn default_keystore_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("launcher")
        .join("keystore")
}

/// `<config dir>/launcher/keystore.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("launcher").join("keystore.toml"))
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            keystore_dir: default_keystore_dir(),
            kdf: KdfParams::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl LauncherConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LauncherConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the default config path when `None`. A missing file
    /// yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keystore_dir.as_os_str().is_empty() {
            anyhow::bail!("keystore_dir must not be empty");
        }

        self.kdf
            .validate()
            .map_err(|e| anyhow::anyhow!("[kdf] {}", e))?;

        if self.throttle.is_enabled() {
            if self.throttle.base_lockout_secs == 0 {
                anyhow::bail!("throttle.base_lockout_secs must be > 0 when throttling is enabled");
            }
            if self.throttle.max_lockout_secs < self.throttle.base_lockout_secs {
                anyhow::bail!("throttle.max_lockout_secs must be >= throttle.base_lockout_secs");
            }
            if self.throttle.max_lockout_secs > MAX_LOCKOUT_SECS {
                anyhow::bail!("throttle.max_lockout_secs must be <= {}", MAX_LOCKOUT_SECS);
            }
        }

        if self.kdf.m_cost < KdfParams::default().m_cost {
            tracing::warn!(
                "KDF memory cost {} KiB is below the recommended {} KiB",
                self.kdf.m_cost,
                KdfParams::default().m_cost
            );
        }

        Ok(())
    }
}
