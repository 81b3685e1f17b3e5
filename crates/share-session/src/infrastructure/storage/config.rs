//! TOML-based configuration for the session runtime.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate location:
//! - Windows:  `%APPDATA%\ScreenShare\config.toml`
//! - Linux:    `~/.config/screenshare/config.toml`
//! - macOS:    `~/Library/Application Support/ScreenShare/config.toml`
//!
//! Example:
//!
//! ```toml
//! [session]
//! local_id = "connectionA"
//! peer_id = "connectionB"
//! data_channel_label = "channelA"
//!
//! [capture]
//! width = 1920
//! height = 1080
//! frames_per_second = 60
//! pixel_format = "bgra8"
//!
//! [signaling]
//! mode = "relay"
//! relay_url = "ws://localhost:8080/"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or
//! an older file without newer fields still loads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use share_core::EndpointId;
use thiserror::Error;

use crate::application::media::BundlePolicy;
use crate::infrastructure::frame_source::CaptureSettings;
use crate::infrastructure::loopback_media::DEFAULT_CANDIDATE_COUNT;
use crate::infrastructure::signaling::DEFAULT_RELAY_URL;

/// Failures while locating, reading, writing or validating the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `APPDATA`, `XDG_CONFIG_HOME` nor `HOME` is set.
    #[error("no per-user config directory on this platform")]
    NoPlatformConfigDir,

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parse but cannot be used together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Who takes part in the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Id of the sharing endpoint.
    #[serde(default = "default_local_id")]
    pub local_id: EndpointId,
    /// Id of the viewing endpoint.
    #[serde(default = "default_peer_id")]
    pub peer_id: EndpointId,
    /// Label of the remote-input data channel.
    #[serde(default = "default_channel_label")]
    pub data_channel_label: String,
    /// Id of the outbound screen track.
    #[serde(default = "default_track_id")]
    pub video_track_id: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How negotiation payloads travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMode {
    /// Both endpoints in this process, routed through an in-memory hub.
    #[default]
    Loopback,
    /// Through a `share-relay` WebSocket server.
    Relay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalingConfig {
    #[serde(default)]
    pub mode: SignalingMode,
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default)]
    pub bundle_policy: BundlePolicy,
    /// Host candidates gathered per connection.
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_local_id() -> EndpointId {
    EndpointId::new("connectionA")
}
fn default_peer_id() -> EndpointId {
    EndpointId::new("connectionB")
}
fn default_channel_label() -> String {
    "channelA".to_string()
}
fn default_track_id() -> String {
    "screen".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}
fn default_candidate_count() -> usize {
    DEFAULT_CANDIDATE_COUNT
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_id: default_local_id(),
            peer_id: default_peer_id(),
            data_channel_label: default_channel_label(),
            video_track_id: default_track_id(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            mode: SignalingMode::default(),
            relay_url: default_relay_url(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bundle_policy: BundlePolicy::default(),
            candidate_count: default_candidate_count(),
        }
    }
}

impl AppConfig {
    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.local_id == self.session.peer_id {
            return Err(ConfigError::Invalid(
                "session.local_id and session.peer_id must differ".to_string(),
            ));
        }
        if self.session.data_channel_label.is_empty() {
            return Err(ConfigError::Invalid("session.data_channel_label is empty".to_string()));
        }
        if self.capture.frames_per_second == 0 {
            return Err(ConfigError::Invalid("capture.frames_per_second must be positive".to_string()));
        }
        if self.transport.candidate_count == 0 {
            return Err(ConfigError::Invalid("transport.candidate_count must be positive".to_string()));
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Per-user ScreenShare directory.
///
/// # Errors
///
/// [`ConfigError::NoPlatformConfigDir`] if the environment does not name one.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// `config.toml` inside [`config_dir`].
///
/// # Errors
///
/// Same as [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Reads `path`.  A missing file yields the defaults.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file exists but cannot be read,
/// [`ConfigError::Parse`] if it is not valid TOML for [`AppConfig`].
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` at the platform location.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Writes `config` as pretty TOML, creating missing parent directories.
///
/// # Errors
///
/// [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ScreenShare"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("screenshare"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("ScreenShare"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
