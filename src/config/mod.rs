//! Application Configuration
//!
//! Static per-run settings stored in TOML format. Every field has a default,
//! so partial files are accepted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Inference service connection
    pub server: ServerSettings,
    /// Capture loop settings
    pub capture: CaptureSettings,
    /// Frame encoder settings
    pub encoder: EncoderSettings,
    /// Overlay surface settings
    pub overlay: OverlaySettings,
}

/// Inference service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Service address as `host:port` (an http:// or ws:// URL also works)
    pub address: String,
    /// Reconnection attempts before giving up
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts
    pub reconnect_delay_ms: u64,
    /// Time allowed for the WebSocket and Socket.IO handshakes
    pub handshake_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
            handshake_timeout_ms: 10_000,
        }
    }
}

/// Capture loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Period between capture ticks
    pub interval_ms: u64,
    /// Upper bound for a single still capture
    pub timeout_ms: u64,
    /// Image file or directory served as the camera
    pub source: Option<PathBuf>,
    /// Start streaming as soon as permission is granted
    pub autostart: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            timeout_ms: 2000,
            source: None,
            autostart: false,
        }
    }
}

/// Frame encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Target width sent to the service
    pub width: u32,
    /// Target height sent to the service
    pub height: u32,
    /// JPEG quality (1 - 100)
    pub quality: u8,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: 70,
        }
    }
}

/// Surface the overlay is rendered onto
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Surface width in pixels
    pub surface_width: u32,
    /// Surface height in pixels
    pub surface_height: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            surface_width: 640,
            surface_height: 480,
        }
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "liveinference", "LiveInference")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the configuration for this run.
///
/// An explicit path must exist and parse. Without one, `config.toml` in the
/// config directory is used if present, otherwise defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        info!("Loading configuration from {}", path.display());
        return load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }

    let path = get_config_dir()?.join("config.toml");
    if path.exists() {
        info!("Loading configuration from {}", path.display());
        load_config(&path).with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        debug!("No config file at {}, using defaults", path.display());
        Ok(AppConfig::default())
    }
}
