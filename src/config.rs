//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub logging: LoggingConfig,
}

/// Room session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling server URL
    pub server_url: String,
    /// Token service base URL
    pub token_server_url: String,
    /// Delay between leaving a room and joining the next one
    pub rejoin_delay_ms: u64,
    /// Subscribe to remote tracks automatically
    pub auto_subscribe: bool,
    pub dynacast: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:7880".to_string(),
            token_server_url: "http://127.0.0.1:3000".to_string(),
            rejoin_delay_ms: 500,
            auto_subscribe: true,
            dynacast: true,
        }
    }
}

impl SessionConfig {
    pub fn rejoin_delay(&self) -> Duration {
        Duration::from_millis(self.rejoin_delay_ms)
    }
}

/// Local capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub video_width: u32,
    pub video_height: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    /// Upper bound on how long an audio frame may wait on the track
    pub audio_capture_timeout_ms: u64,
    pub screen_fps: u32,
    /// Consecutive transport rejections before a channel reports degraded
    pub degraded_after_rejections: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_width: 1280,
            video_height: 720,
            audio_sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            audio_channels: crate::constants::DEFAULT_CHANNELS,
            audio_capture_timeout_ms: 100,
            screen_fps: 30,
            degraded_after_rejections: 50,
        }
    }
}

impl CaptureConfig {
    pub fn audio_capture_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_capture_timeout_ms)
    }
}

/// Remote playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frames buffered by a remote video stream
    pub video_stream_capacity: usize,
    /// Frames buffered by a remote audio stream
    pub audio_stream_capacity: usize,
    /// Output buffer length for remote audio
    pub audio_buffer_ms: u32,
    pub initial_volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            video_stream_capacity: 3,
            audio_stream_capacity: 10,
            audio_buffer_ms: 200,
            initial_volume: 1.0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig =
            toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Ignoring invalid configuration: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Write configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/media-relay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "media-relay").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        let c = &self.capture;
        if c.video_width == 0 || c.video_height == 0 {
            return Err(Error::Config("video resolution must be non-zero".into()));
        }
        if c.audio_sample_rate == 0 || c.audio_channels == 0 {
            return Err(Error::Config("audio format must be non-zero".into()));
        }
        if c.screen_fps == 0 || c.screen_fps > 120 {
            return Err(Error::Config(format!("invalid screen fps {}", c.screen_fps)));
        }
        let p = &self.playback;
        if p.video_stream_capacity == 0 || p.audio_stream_capacity == 0 {
            return Err(Error::Config("stream capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&p.initial_volume) {
            return Err(Error::Config(format!("volume {} out of range", p.initial_volume)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [capture]
            screen_fps = 15

            [session]
            server_url = "wss://meet.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.screen_fps, 15);
        assert_eq!(config.capture.video_width, 1280);
        assert_eq!(config.session.server_url, "wss://meet.example.com");
        assert_eq!(config.session.rejoin_delay_ms, 500);
        assert_eq!(config.playback.video_stream_capacity, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.capture.audio_capture_timeout_ms = 40;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.capture.screen_fps = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.playback.initial_volume = 1.5;
        assert!(config.validate().is_err());
    }
}
