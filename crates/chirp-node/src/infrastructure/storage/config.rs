//! TOML-based configuration persistence for the Chirp node.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Chirp\config.toml`
//! - Linux:    `~/.config/chirp/config.toml`
//! - macOS:    `~/Library/Application Support/Chirp/config.toml`
//!
//! An explicit path (the `--config` flag) replaces the platform location.
//!
//! ```toml
//! [node]
//! display_name = "alice"
//! mode = "mesh"
//!
//! [radio]
//! scan_interval_ms = 5000
//! beacon_port = 47800
//!
//! [audio]
//! asset_dir = "/var/lib/chirp/sounds"
//! ```
//!
//! Every field has a `#[serde(default = ...)]`, and every section defaults as a
//! whole, so an empty or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chirp_core::{ServiceIds, DEFAULT_CHARACTERISTIC_UUID, DEFAULT_SERVICE_UUID};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::application::discovery::DiscoveryConfig;
use crate::application::transport::TransportMode;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Identity and process behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Name announced to peers.  Defaults to `chirp-<id>` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Radio deployment: `"mesh"` or `"broadcast"`.
    #[serde(default = "default_mode")]
    pub mode: TransportMode,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Delay before the node is brought up again after an init failure.
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
}

/// Radio identifiers, timing, and LAN socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadioConfig {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: Uuid,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Address all LAN sockets bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// UDP port for mesh advertisement beacons.
    #[serde(default = "default_beacon_port")]
    pub beacon_port: u16,
    /// TCP port for mesh links.  `0` picks a free port.
    #[serde(default)]
    pub link_port: u16,
    /// UDP port for broadcast-mode datagrams.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// Destination of beacons and broadcast-mode datagrams.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
}

/// Sample storage and playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Directory holding the `.wav` samples.
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,
    /// Playback volume, 0.0 to 1.0.
    #[serde(default = "default_volume")]
    pub volume: f32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_mode() -> TransportMode {
    TransportMode::Mesh
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_restart_backoff_ms() -> u64 {
    2000
}
fn default_service_uuid() -> Uuid {
    DEFAULT_SERVICE_UUID
}
fn default_characteristic_uuid() -> Uuid {
    DEFAULT_CHARACTERISTIC_UUID
}
fn default_scan_interval_ms() -> u64 {
    5000
}
fn default_scan_window_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_beacon_port() -> u16 {
    47800
}
fn default_broadcast_port() -> u16 {
    47802
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_asset_dir() -> PathBuf {
    PathBuf::from("assets")
}
fn default_volume() -> f32 {
    0.8
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            mode: default_mode(),
            log_level: default_log_level(),
            restart_backoff_ms: default_restart_backoff_ms(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            scan_interval_ms: default_scan_interval_ms(),
            scan_window_ms: default_scan_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            bind_address: default_bind_address(),
            beacon_port: default_beacon_port(),
            link_port: 0,
            broadcast_port: default_broadcast_port(),
            broadcast_address: default_broadcast_address(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
            volume: default_volume(),
        }
    }
}

impl RadioConfig {
    pub fn service_ids(&self) -> ServiceIds {
        ServiceIds {
            service: self.service_uuid,
            characteristic: self.characteristic_uuid,
        }
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            scan_window: Duration::from_millis(self.scan_window_ms),
            service: self.service_uuid,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl NodeConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, or from the platform location when `None`.
///
/// A file that does not exist yields `AppConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to `path`, or to the platform location when `None`.
///
/// Creates the parent directory if needed.
pub fn save_config(config: &AppConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Chirp"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("chirp"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Chirp")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("chirp_test_{}", Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_app_config_defaults() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.node.mode, TransportMode::Mesh);
        assert_eq!(cfg.node.log_level, "info");
        assert!(cfg.node.display_name.is_none());
        assert_eq!(cfg.radio.scan_interval_ms, 5000);
        assert_eq!(cfg.radio.scan_window_ms, 1000);
        assert_eq!(cfg.radio.service_ids(), ServiceIds::default());
        assert_eq!(cfg.audio.asset_dir, PathBuf::from("assets"));
    }

    #[test]
    fn test_discovery_config_follows_radio_settings() {
        let mut radio = RadioConfig::default();
        radio.scan_interval_ms = 250;

        let discovery = radio.discovery();

        assert_eq!(discovery.scan_interval, Duration::from_millis(250));
        assert_eq!(discovery.service, DEFAULT_SERVICE_UUID);
    }

    #[test]
    fn test_app_config_serializes_and_deserializes_round_trip() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.node.display_name = Some("alice".into());
        cfg.node.mode = TransportMode::Broadcast;
        cfg.radio.beacon_port = 9000;

        // Act
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&text).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
        assert!(text.contains("mode = \"broadcast\""));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_named_fields() {
        // Arrange
        let text = r#"
[radio]
scan_interval_ms = 1500
"#;

        // Act
        let cfg: AppConfig = toml::from_str(text).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.radio.scan_interval_ms, 1500);
        assert_eq!(cfg.radio.scan_window_ms, 1000);
        assert_eq!(cfg.node, NodeConfig::default());
    }

    #[test]
    fn test_unknown_mode_is_a_parse_error() {
        let result: Result<AppConfig, _> = toml::from_str("[node]\nmode = \"carrier-pigeon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let cfg = load_config(Some(&temp_path())).expect("absent file is fine");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_config_reports_malformed_file() {
        // Arrange
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        // Act
        let result = load_config(Some(&path));

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let path = temp_path();
        let mut cfg = AppConfig::default();
        cfg.audio.volume = 0.25;
        cfg.node.log_level = "debug".into();

        // Act
        save_config(&cfg, Some(&path)).unwrap();
        let loaded = load_config(Some(&path)).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
