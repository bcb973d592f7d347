//! singleapp configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::coordinator::Role;

/// Default channel name, the same one the browser demo used
pub const DEFAULT_CHANNEL_NAME: &str = "app-instance";

/// Main singleapp configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Channel hub settings, read by whoever builds the hub
    pub hub: HubConfig,

    /// Election protocol parameters
    pub election: ElectionConfig,

    /// How the embedding application reacts to coordination failures
    pub consumer: ConsumerConfig,

    /// Host-wide lock file settings
    #[serde(rename = "host-lock")]
    pub host_lock: HostLockConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .singleapp.yml
        let local_config = PathBuf::from(".singleapp.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/singleapp/singleapp.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("singleapp").join("singleapp.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load later reports them.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => PathBuf::from(".singleapp.yml"),
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    pub(crate) fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Election protocol parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Channel name; instances on the same name are peers
    #[serde(rename = "channel-name")]
    pub channel_name: String,

    /// Election window T in milliseconds
    #[serde(rename = "window-ms")]
    pub window_ms: u64,

    /// Resolve simultaneous starts by instance id
    #[serde(rename = "tie-break")]
    pub tie_break: bool,

    /// Secondaries start a new election when the primary resigns
    #[serde(rename = "rejoin-on-resign")]
    pub rejoin_on_resign: bool,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            window_ms: 100,
            tie_break: true,
            rejoin_on_resign: false,
        }
    }
}

impl ElectionConfig {
    /// Config for a named channel, everything else default
    pub fn for_channel(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            ..Default::default()
        }
    }

    /// Get the election window as a Duration
    pub fn window(&self) -> Duration {
        debug!(window_ms = %self.window_ms, "ElectionConfig::window: called");
        Duration::from_millis(self.window_ms)
    }
}

/// Channel hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-channel buffer (messages) before slow receivers lag
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Consumer-side behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Role assumed when coordination cannot start
    #[serde(rename = "fallback-role")]
    pub fallback_role: Role,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fallback_role: Role::Primary,
        }
    }
}

/// Host-wide lock file settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostLockConfig {
    /// Lock file path; defaults to the runtime dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl HostLockConfig {
    /// Resolve the lock file path for a channel
    pub fn resolve_path(&self, channel_name: &str) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        dirs::runtime_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("singleapp")
            .join(format!("{}.lock", channel_name))
    }
}
