//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_AUDIO_FRAME_SIZE, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## Special environment variables:
//! `HOST` and `PORT` (deployment platforms) and `API_KEY` (live channel
//! credential) are honored without the APP_ prefix.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, audio, channel, remote,
/// performance) keeps each concern reviewable on its own and mirrors the module
/// boundaries of the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub channel: ChannelConfig,
    pub remote: RemoteConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio pipeline configuration.
///
/// ## Fields:
/// - `capture_sample_rate`: microphone rate for outbound speech (16 kHz mono
///   is what the live model expects)
/// - `frame_size`: samples per capture frame; must be a power of two
/// - `playback_sample_rate`: rate of synthesized audio coming back from the
///   model (typically higher than the capture rate)
/// - `channels`: channel count for both directions (mono)
/// - `outbound_queue_frames`: bound of the capture-to-channel queue; when the
///   queue is full, frames are dropped rather than buffered (stale audio is
///   worse than missing audio)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub frame_size: usize,
    pub playback_sample_rate: u32,
    pub channels: u16,
    pub outbound_queue_frames: usize,
}

/// Live channel configuration (the bidirectional model connection).
///
/// ## Fields:
/// - `url`: WebSocket endpoint of the live voice model gateway
/// - `api_key`: credential appended to the connection URL; usually supplied
///   via the API_KEY environment variable rather than the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub url: String,
    pub api_key: String,
}

/// Remote voice service configuration (vocal analysis and speech synthesis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: String,
    pub analysis_model: String,
    pub synthesis_model: String,
}

/// Performance tuning configuration.
///
/// ## Tuning guidelines:
/// - Higher concurrent sessions: more simultaneous conversations, but each one
///   holds a microphone stream and an output sink
/// - `session_max_age_seconds`: finished or abandoned session records older
///   than this are swept from the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub session_max_age_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                capture_sample_rate: 16_000,  // what the live model expects inbound
                frame_size: 4096,             // power-of-two capture frame
                playback_sample_rate: 24_000, // native rate of synthesized audio
                channels: 1,                  // mono both ways
                outbound_queue_frames: 8,     // drop beyond this, never buffer
            },
            channel: ChannelConfig {
                url: "ws://127.0.0.1:9090/v1/live".to_string(),
                api_key: String::new(),
            },
            remote: RemoteConfig {
                base_url: "http://127.0.0.1:9091/v1".to_string(),
                api_key: String::new(),
                analysis_model: "voice-profiler-1".to_string(),
                synthesis_model: "voice-tts-1".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 4,
                session_max_age_seconds: 3600,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and API_KEY
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // The live-channel credential is a secret; prefer the environment
        // over the config file.
        if let Ok(key) = env::var("API_KEY") {
            settings = settings.set_override("channel.api_key", key.clone())?;
            settings = settings.set_override("remote.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Capture frame size is a non-zero power of two (the capture device
    ///   delivers fixed-size frames and the codec relies on it)
    /// - Sample rates and channel count are non-zero
    /// - The outbound queue has room for at least one frame
    /// - At least one concurrent session is allowed
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.frame_size == 0 || !self.audio.frame_size.is_power_of_two() {
            return Err(anyhow::anyhow!(
                "Capture frame size must be a power of two, got {}",
                self.audio.frame_size
            ));
        }

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }

        if self.audio.outbound_queue_frames == 0 {
            return Err(anyhow::anyhow!("Outbound queue must hold at least one frame"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched. For example,
    /// `{"audio": {"outbound_queue_frames": 16}}` changes just the queue bound.
    /// The updated configuration is re-validated before being accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(rate) = audio.get("capture_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.capture_sample_rate = rate as u32;
            }
            if let Some(size) = audio.get("frame_size").and_then(|v| v.as_u64()) {
                self.audio.frame_size = size as usize;
            }
            if let Some(rate) = audio.get("playback_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.playback_sample_rate = rate as u32;
            }
            if let Some(frames) = audio.get("outbound_queue_frames").and_then(|v| v.as_u64()) {
                self.audio.outbound_queue_frames = frames as usize;
            }
        }

        if let Some(channel) = partial.get("channel") {
            if let Some(url) = channel.get("url").and_then(|v| v.as_str()) {
                self.channel.url = url.to_string();
            }
        }

        if let Some(remote) = partial.get("remote") {
            if let Some(url) = remote.get("base_url").and_then(|v| v.as_str()) {
                self.remote.base_url = url.to_string();
            }
            if let Some(model) = remote.get("analysis_model").and_then(|v| v.as_str()) {
                self.remote.analysis_model = model.to_string();
            }
            if let Some(model) = remote.get("synthesis_model").and_then(|v| v.as_str()) {
                self.remote.synthesis_model = model.to_string();
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(age) = performance
                .get("session_max_age_seconds")
                .and_then(|v| v.as_u64())
            {
                self.performance.session_max_age_seconds = age;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration must be valid and carry the documented rates.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.playback_sample_rate, 24_000);
        assert_eq!(config.audio.frame_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_size = 3000; // not a power of two
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.outbound_queue_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"outbound_queue_frames": 16}, "server": {"port": 9090}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.audio.outbound_queue_frames, 16);
        assert_eq!(config.server.port, 9090);
        // Untouched fields keep their defaults
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.frame_size, 4096);
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"frame_size": 1000}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
