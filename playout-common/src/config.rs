//! Bootstrap configuration and root folder resolution
//!
//! Settings come from, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`PLAYOUT_CONFIG`, `PLAYOUT_ROOT_FOLDER`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is not an error: a warning is logged and the
//! compiled defaults are used.

use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "PLAYOUT_CONFIG";
pub const ROOT_FOLDER_ENV_VAR: &str = "PLAYOUT_ROOT_FOLDER";
const CONFIG_FILE_NAME: &str = "playout.toml";

/// Configuration loaded from `playout.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Root folder for media, plans and state (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Directory for state snapshots; defaults to `<root>/state`
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Number of playback channels
    #[serde(default = "default_channels")]
    pub channels: u8,

    /// Player units started per channel
    #[serde(default = "default_players_per_channel")]
    pub players_per_channel: u8,

    /// Player whose reports drive channel transport state
    #[serde(default)]
    pub primary_player: u8,

    /// Channel and player loop interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Router fan-out interval
    #[serde(default = "default_router_interval_ms")]
    pub router_interval_ms: u64,

    /// Minimum spacing of snapshot writes caused by position changes
    #[serde(default = "default_position_persist_interval_ms")]
    pub position_persist_interval_ms: u64,

    /// Capacity of each router destination queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_server_name() -> String {
    "Playout Server".to_string()
}

fn default_channels() -> u8 {
    3
}

fn default_players_per_channel() -> u8 {
    1
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_router_interval_ms() -> u64 {
    20
}

fn default_position_persist_interval_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            state_dir: None,
            server_name: default_server_name(),
            channels: default_channels(),
            players_per_channel: default_players_per_channel(),
            primary_player: 0,
            poll_interval_ms: default_poll_interval_ms(),
            router_interval_ms: default_router_interval_ms(),
            position_persist_interval_ms: default_position_persist_interval_ms(),
            queue_capacity: default_queue_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No config file was found
    Defaults,
}

impl ConfigSource {
    /// Log the outcome: a warning when built-in defaults are in use
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {:?}", path),
            ConfigSource::Defaults => {
                warn!("No {} found, using built-in defaults", CONFIG_FILE_NAME)
            }
        }
    }
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        let config: TomlConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the resolved config path, falling back to defaults
    ///
    /// An unreadable or invalid file is an error; an absent one is not.
    /// Nothing is logged here because this usually runs before logging is
    /// set up; callers report the returned [`ConfigSource`] once it is.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        match resolve_config_path(cli_path) {
            Some(path) => {
                let config = Self::load(&path)?;
                Ok((config, ConfigSource::File(path)))
            }
            None => Ok((Self::default(), ConfigSource::Defaults)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::Config("channels must be at least 1".into()));
        }
        if self.players_per_channel == 0 {
            return Err(Error::Config("players_per_channel must be at least 1".into()));
        }
        if self.primary_player >= self.players_per_channel {
            return Err(Error::Config(format!(
                "primary_player {} out of range for {} players per channel",
                self.primary_player, self.players_per_channel
            )));
        }
        if self.poll_interval_ms == 0 || self.router_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be non-zero".into()));
        }
        Ok(())
    }

    /// State directory for a resolved root folder
    pub fn state_dir(&self, root_folder: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| root_folder.join("state"))
    }

    pub fn poll_interval(&self) -> Duration {
        millis_to_duration(self.poll_interval_ms)
    }

    pub fn router_interval(&self) -> Duration {
        millis_to_duration(self.router_interval_ms)
    }

    pub fn position_persist_interval(&self) -> Duration {
        millis_to_duration(self.position_persist_interval_ms)
    }
}

/// Locate the config file: CLI path, then `PLAYOUT_CONFIG`, then the
/// platform config locations. Returns `None` when nothing exists.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("playout").join(CONFIG_FILE_NAME));
    if let Some(path) = user_config.filter(|p| p.exists()) {
        return Some(path);
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/playout").join(CONFIG_FILE_NAME);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Root folder: CLI argument, then `PLAYOUT_ROOT_FOLDER`, then the TOML
/// value, then the OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/playout (or /var/lib/playout for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("playout"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/playout"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("playout"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/playout"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("playout"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\playout"))
    } else {
        PathBuf::from("./playout_data")
    }
}
