//! Configuration management for the AirDesk server.
//!
//! Loaded from and saved to the platform-standard config directory:
//! - Linux: `~/.config/airdesk/config.json`
//! - macOS: `~/Library/Application Support/airdesk/config.json`
//! - Windows: `%APPDATA%\airdesk\config.json`

use airdesk_common::Codec;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Recognized server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Target frame rate, 1..=240. Drives the pacing period and the
    /// encoder bitrate; the peer can override it at runtime.
    #[serde(default = "default_fps")]
    pub target_fps: u32,
    /// Preferred codec; falls back along the capability bitmap if the
    /// hardware cannot provide it.
    #[serde(default = "default_codec")]
    pub codec: Codec,
    /// Capture monitor index (0-based, primary first).
    #[serde(default)]
    pub monitor: u8,
    /// Include the OS cursor in captured frames.
    #[serde(default)]
    pub cursor_capture: bool,
    /// Enable outbound system-audio streaming.
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
    /// Enable inbound microphone playback.
    #[serde(default = "default_true")]
    pub mic_enabled: bool,
    /// Substring matched against render-device friendly names for the
    /// microphone sink; the default output device is used when absent.
    #[serde(default = "default_mic_device")]
    pub mic_device: String,
    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_fps() -> u32 {
    60
}

fn default_codec() -> Codec {
    Codec::Av1
}

fn default_true() -> bool {
    true
}

fn default_mic_device() -> String {
    "CABLE Input".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_fps: default_fps(),
            codec: default_codec(),
            monitor: 0,
            cursor_capture: false,
            audio_enabled: true,
            mic_enabled: true,
            mic_device: default_mic_device(),
            debug: false,
        }
    }
}

impl AppConfig {
    /// Clamp out-of-range values after deserialization.
    pub fn sanitized(mut self) -> Self {
        if !(1..=240).contains(&self.target_fps) {
            warn!("Config target_fps {} out of range, using 60", self.target_fps);
            self.target_fps = 60;
        }
        self
    }
}

/// Get the path to the config file.
fn get_config_path() -> Result<PathBuf, String> {
    let proj_dirs =
        ProjectDirs::from("", "", "airdesk").ok_or("Could not determine config directory")?;
    Ok(proj_dirs.config_dir().join("config.json"))
}

/// Load configuration from disk.
/// Returns default config if the file doesn't exist or is invalid.
pub fn load_config() -> AppConfig {
    let path = match get_config_path() {
        Ok(p) => p,
        Err(e) => {
            warn!("Config path unavailable: {}", e);
            return AppConfig::default();
        }
    };

    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                warn!("Invalid config file {:?}: {}", path, e);
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

/// Save configuration to disk.
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let path = get_config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config dir: {}", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(&path, json).map_err(|e| format!("Failed to write config: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.target_fps, 60);
        assert_eq!(c.codec, Codec::Av1);
        assert!(c.audio_enabled);
        assert!(!c.cursor_capture);
    }

    #[test]
    fn test_sanitize_clamps_fps() {
        let c = AppConfig {
            target_fps: 500,
            ..Default::default()
        };
        assert_eq!(c.sanitized().target_fps, 60);

        let c = AppConfig {
            target_fps: 0,
            ..Default::default()
        };
        assert_eq!(c.sanitized().target_fps, 60);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: AppConfig = serde_json::from_str(r#"{"target_fps": 120}"#).unwrap();
        assert_eq!(c.target_fps, 120);
        assert_eq!(c.codec, Codec::Av1);
        assert_eq!(c.mic_device, "CABLE Input");
    }

    #[test]
    fn test_codec_string_form() {
        let c: AppConfig = serde_json::from_str(r#"{"codec": "h264"}"#).unwrap();
        assert_eq!(c.codec, Codec::H264);
    }
}
