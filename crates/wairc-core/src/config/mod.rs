use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

#[cfg(test)]
mod tests;

use crate::error::WaircError;
use defaults::*;

/// Top-level wairc configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wairc: GeneralConfig,
    #[serde(default)]
    pub irc: IrcConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub maps: MapsConfig,
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily rolling log files. Unset = stderr only.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

/// IRC listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    /// Name used as the prefix of every server-originated line.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// How long a client with a stored password gets to send `PASS`.
    #[serde(default = "default_password_grace_secs")]
    pub password_grace_secs: u64,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_irc_port(),
            server_name: default_server_name(),
            password_grace_secs: default_password_grace_secs(),
        }
    }
}

/// Browser-automation sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_setup_attempts")]
    pub setup_attempts: u32,
    #[serde(default = "default_setup_retry_delay_ms")]
    pub setup_retry_delay_ms: u64,
    #[serde(default = "default_message_poll_ms")]
    pub message_poll_ms: u64,
    #[serde(default = "default_login_poll_ms")]
    pub login_poll_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_bridge_endpoint(),
            headless: true,
            setup_attempts: default_setup_attempts(),
            setup_retry_delay_ms: default_setup_retry_delay_ms(),
            message_poll_ms: default_message_poll_ms(),
            login_poll_ms: default_login_poll_ms(),
        }
    }
}

/// Hosting of downloaded media and login QR codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_files_dir")]
    pub dir: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_files_port")]
    pub port: u16,
    #[serde(default)]
    pub https: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            dir: default_files_dir(),
            host: default_host(),
            port: default_files_port(),
            https: false,
        }
    }
}

/// Session persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// How history is replayed to clients on connect.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Replay only when the client negotiates the replay capability.
    #[default]
    Normal,
    /// Always replay, collapsed into lines from a `replay` pseudo-user.
    Alternative,
}

/// Replay and message-pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub mode: ReplayMode,
    /// Number of message IDs remembered per chat for dedup.
    #[serde(default = "default_seen_ids_capacity")]
    pub seen_ids_capacity: usize,
    /// Number of messages whose media may be prefetched ahead of delivery.
    #[serde(default = "default_prefetch_capacity")]
    pub prefetch_capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::default(),
            seen_ids_capacity: default_seen_ids_capacity(),
            prefetch_capacity: default_prefetch_capacity(),
        }
    }
}

/// Map provider used to render location messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapProvider {
    #[default]
    GoogleMaps,
    OpenStreetMap,
}

impl MapProvider {
    /// URL pointing at the given coordinates.
    pub fn url(&self, latitude: f64, longitude: f64) -> String {
        match self {
            Self::GoogleMaps => format!("https://maps.google.com/?q={latitude:.6},{longitude:.6}"),
            Self::OpenStreetMap => format!(
                "https://www.openstreetmap.org/#map=19/{latitude:.6}/{longitude:.6}"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapsConfig {
    #[serde(default)]
    pub provider: MapProvider,
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, WaircError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| WaircError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| WaircError::Config(format!("failed to parse config: {}", e)))?;

    if config.replay.seen_ids_capacity == 0 {
        return Err(WaircError::Config(
            "replay.seen_ids_capacity must be at least 1".into(),
        ));
    }
    if config.replay.prefetch_capacity == 0 {
        return Err(WaircError::Config(
            "replay.prefetch_capacity must be at least 1".into(),
        ));
    }

    Ok(config)
}
