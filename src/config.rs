use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{IntakeError, Result};

fn default_url() -> String {
    "ws://localhost:8000/realtime/ws/realtime".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_handshake_timeout_ms() -> u64 {
    5000
}

const fn default_close_flush_ms() -> u64 {
    100
}

const fn default_block_size() -> usize {
    512
}

const fn default_flush_samples() -> usize {
    1600
}

const fn default_flush_interval_ms() -> u64 {
    50
}

const fn default_fallback_margin_ms() -> u64 {
    50
}

const fn default_turn_gap_ms() -> u64 {
    800
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_close_flush_ms")]
    pub close_flush_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            close_flush_ms: default_close_flush_ms(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub const fn close_flush(&self) -> Duration {
        Duration::from_millis(self.close_flush_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub device: Option<String>,

    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_flush_samples")]
    pub flush_samples: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_true")]
    pub echo_cancellation: bool,

    #[serde(default = "default_true")]
    pub noise_suppression: bool,

    #[serde(default = "default_true")]
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            block_size: default_block_size(),
            flush_samples: default_flush_samples(),
            flush_interval_ms: default_flush_interval_ms(),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    pub device: Option<String>,

    #[serde(default = "default_fallback_margin_ms")]
    pub fallback_margin_ms: u64,

    /// Keep outbound audio muted until queued speech has finished playing,
    /// not just until the server announces `tts_end`.
    #[serde(default)]
    pub hold_mute_during_playback: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            fallback_margin_ms: default_fallback_margin_ms(),
            hold_mute_during_playback: false,
        }
    }
}

impl PlaybackConfig {
    #[must_use]
    pub const fn fallback_margin(&self) -> Duration {
        Duration::from_millis(self.fallback_margin_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Inactivity after which the next assistant fragment starts a new turn.
    #[serde(default = "default_turn_gap_ms")]
    pub turn_gap_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            turn_gap_ms: default_turn_gap_ms(),
        }
    }
}

impl ConversationConfig {
    #[must_use]
    pub const fn turn_gap(&self) -> Duration {
        Duration::from_millis(self.turn_gap_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IntakeError::Config(format!(
                "config file not found: {}; create it or use --config to specify a path",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            IntakeError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load the file at the default location, falling back to built-in
    /// defaults when it does not exist.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Point the session at a different server.
    pub fn set_server_url(&mut self, url: &str) -> Result<()> {
        self.server.url = url.to_string();
        self.validate()
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("intake/config.yaml")
    }

    fn validate(&self) -> Result<()> {
        if self.capture.block_size == 0 {
            return Err(IntakeError::Config(
                "capture.block_size must be greater than zero".to_string(),
            ));
        }
        if !self.server.url.starts_with("ws://") && !self.server.url.starts_with("wss://") {
            return Err(IntakeError::Config(format!(
                "server.url must be a ws:// or wss:// URL, got {}",
                self.server.url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config =
            serde_yaml_ng::from_str("{}").unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.server.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.capture.block_size, 512);
        assert_eq!(config.capture.flush_samples, 1600);
        assert!(config.capture.echo_cancellation);
        assert_eq!(config.conversation.turn_gap(), Duration::from_millis(800));
        assert!(!config.playback.hold_mute_during_playback);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
server:
  url: "wss://voice.example.com/realtime"
  connect_timeout_ms: 2000
  handshake_timeout_ms: 3000
  close_flush_ms: 250

capture:
  device: "USB Microphone"
  block_size: 1024
  flush_samples: 3200
  flush_interval_ms: 100
  echo_cancellation: false

playback:
  device: "Speakers"
  fallback_margin_ms: 80
  hold_mute_during_playback: true

conversation:
  turn_gap_ms: 1200
"#;
        let config: Config =
            serde_yaml_ng::from_str(yaml).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.server.url, "wss://voice.example.com/realtime");
        assert_eq!(config.server.handshake_timeout(), Duration::from_secs(3));
        assert_eq!(config.server.close_flush(), Duration::from_millis(250));
        assert_eq!(config.capture.device.as_deref(), Some("USB Microphone"));
        assert_eq!(config.capture.flush_interval(), Duration::from_millis(100));
        assert!(!config.capture.echo_cancellation);
        assert!(config.capture.noise_suppression);
        assert_eq!(config.playback.device.as_deref(), Some("Speakers"));
        assert_eq!(config.playback.fallback_margin(), Duration::from_millis(80));
        assert!(config.playback.hold_mute_during_playback);
        assert_eq!(config.conversation.turn_gap_ms, 1200);
    }

    #[test]
    fn missing_config_file_gives_error() {
        let result = Config::load(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("config file not found"));
    }

    #[test]
    fn rejects_non_websocket_url() {
        let config: Config = serde_yaml_ng::from_str("server:\n  url: http://localhost\n")
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn url_override_is_validated() {
        let mut config = Config::default();
        config
            .set_server_url("wss://other.example.com/ws")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.server.url, "wss://other.example.com/ws");
        assert!(config.set_server_url("ftp://nope").is_err());
    }
}
