//! Configuration for chute-link
//!
//! The daemon reads one TOML file at startup. The matching window is read
//! through a [`ConfigProvider`] on every event instead of being cached, so
//! edits take effect on the next trigger without a restart.

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub matching: EngineConfig,
    pub logging: LoggingConfig,
}

/// Controller listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Interface to listen on (e.g. `0.0.0.0`)
    pub bind_address: String,
    /// TCP port the conveyor controller connects to
    pub port: u16,
}

/// Matching window and fallback chute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Identifications arriving sooner than this after the trigger are ignored
    pub min_wait_ms: u64,
    /// Deadline after which the slot goes to the exception chute
    pub max_wait_ms: u64,
    /// Chute for slots that never matched
    pub exception_chute: u8,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Seconds between statistics lines, 0 disables them
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_stats_interval() -> u64 {
    30
}

impl EngineConfig {
    /// Reject windows that can never match
    pub fn validate(&self) -> Result<()> {
        if self.max_wait_ms == 0 {
            return Err(Error::InvalidConfig("max_wait_ms must be > 0".to_string()));
        }
        if self.min_wait_ms > self.max_wait_ms {
            return Err(Error::InvalidConfig(format!(
                "min_wait_ms ({}) exceeds max_wait_ms ({})",
                self.min_wait_ms, self.max_wait_ms
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_wait_ms: 1000,
            max_wait_ms: 3000,
            exception_chute: 99,
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use chute_link::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("chute-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.matching.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 2000,
            },
            matching: EngineConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                stats_interval_secs: default_stats_interval(),
            },
        }
    }
}

/// Source of the matching window, polled on every event
pub trait ConfigProvider: Send + Sync {
    fn load_config(&self) -> EngineConfig;
}

/// Fixed configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticConfig(pub EngineConfig);

impl ConfigProvider for StaticConfig {
    fn load_config(&self) -> EngineConfig {
        self.0
    }
}

/// In-memory configuration that can be swapped at runtime
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<EngineConfig>>,
}

impl SharedConfig {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Replace the window; applies from the next event on
    pub fn update(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }
}

impl ConfigProvider for SharedConfig {
    fn load_config(&self) -> EngineConfig {
        *self.inner.read()
    }
}

/// Reads the `[matching]` table from the config file on every call
///
/// A missing or broken file keeps the last good value so a half-written edit
/// never stops sorting.
pub struct TomlFileConfig {
    path: PathBuf,
    last_good: Mutex<EngineConfig>,
}

#[derive(Deserialize)]
struct MatchingSection {
    matching: EngineConfig,
}

impl TomlFileConfig {
    pub fn new<P: Into<PathBuf>>(path: P, initial: EngineConfig) -> Self {
        Self {
            path: path.into(),
            last_good: Mutex::new(initial),
        }
    }

    fn read(&self) -> Result<EngineConfig> {
        let contents = fs::read_to_string(&self.path)?;
        let section: MatchingSection = toml::from_str(&contents)?;
        section.matching.validate()?;
        Ok(section.matching)
    }
}

impl ConfigProvider for TomlFileConfig {
    fn load_config(&self) -> EngineConfig {
        let mut last_good = self.last_good.lock();
        match self.read() {
            Ok(config) => {
                if config != *last_good {
                    log::info!("Matching config reloaded: {:?}", config);
                    *last_good = config;
                }
                config
            }
            Err(e) => {
                log::warn!(
                    "Failed to reload {}: {} (keeping {:?})",
                    self.path.display(),
                    e,
                    *last_good
                );
                *last_good
            }
        }
    }
}
