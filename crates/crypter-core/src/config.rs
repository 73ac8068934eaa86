use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CrypterError, CrypterResult};

/// Default similarity ratio at or above which a damaged ciphertext is recovered
pub const DEFAULT_RECOVERY_THRESHOLD: f64 = 0.8;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrypterConfig {
    pub store: StoreConfig,
    pub recovery: RecoveryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Encrypted key store file (default: ~/.config/crypter/keys.json)
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Similarity ratio in (0.0, 1.0] needed to fall back to the stored ciphertext
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.config/crypter/keys.json"),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RECOVERY_THRESHOLD,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl CrypterConfig {
    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> CrypterResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CrypterError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the system cannot honor.
    pub fn validate(&self) -> CrypterResult<()> {
        let t = self.recovery.threshold;
        if t.is_nan() || t <= 0.0 || t > 1.0 {
            return Err(CrypterError::Config(format!(
                "recovery.threshold must be in (0.0, 1.0], got {t}"
            )));
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            return Err(CrypterError::Config(format!(
                "log.format must be \"json\" or \"text\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }

    /// Key store path with `~` expanded.
    pub fn store_path(&self) -> PathBuf {
        expand_tilde(&self.store.path)
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
