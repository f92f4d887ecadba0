//! # Configuration Management
//!
//! Loads the relay settings from multiple sources:
//! - TOML configuration file (relay.toml)
//! - Environment variables (with RELAY_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (RELAY_AUDIO__SAMPLE_RATE, RELAY_TIMING__TICK_MS, etc.)
//! 2. Configuration file (relay.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The timing values used to be hard-coded in the capture/playback glue
//! (200 ms settle delay, 10 ms tick, depth-4 threshold). They are named
//! settings here; the defaults keep the old behavior.

use crate::error::{AudioError, AudioResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub audio: AudioSettings,
    pub timing: TimingSettings,
    pub logging: LoggingSettings,
}

/// Stream format for both capture and playback.
///
/// ## Fields:
/// - `sample_rate`: samples per second per channel (16000 for speech)
/// - `channels`: 1 = mono, 2 = stereo
/// - `time_slice_ms`: how much audio each capture callback delivers
/// - `buffers_before_playback`: buffers submitted through `play_byte_array`
///   before playback is started
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub time_slice_ms: u64,
    pub buffers_before_playback: usize,
}

/// Timing knobs for the real-time loops.
///
/// ## Tuning guidelines:
/// - Longer settle delay: more robust start on slow platforms, more start latency
/// - Higher queue depth threshold: more jitter tolerance, more playback latency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSettings {
    pub settle_delay_ms: u64,
    pub tick_ms: u64,
    pub queue_depth_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Fallback `EnvFilter` directive when RUST_LOG is unset
    pub filter: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            audio: AudioSettings::default(),
            timing: TimingSettings::default(),
            logging: LoggingSettings {
                filter: "pcm_relay=info".to_string(),
            },
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,          // 16kHz speech
            channels: 1,                 // Mono
            time_slice_ms: 500,          // Half-second chunks
            buffers_before_playback: 4,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 200,
            tick_ms: 10,
            queue_depth_threshold: 4,
        }
    }
}

impl RelayConfig {
    /// Load configuration from defaults, `relay.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `RELAY_AUDIO__SAMPLE_RATE=48000`
    /// - `RELAY_TIMING__TICK_MS=5`
    pub fn load() -> AudioResult<Self> {
        Self::load_from("relay")
    }

    /// Same as [`RelayConfig::load`] with a custom file stem.
    pub fn load_from(file_stem: &str) -> AudioResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&RelayConfig::default())?)
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: RelayConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document layered over the defaults.
    pub fn from_toml_str(toml: &str) -> AudioResult<Self> {
        let config: RelayConfig = config::Config::builder()
            .add_source(config::Config::try_from(&RelayConfig::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the codec or the loops.
    pub fn validate(&self) -> AudioResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(AudioError::Config("sample_rate must be greater than 0".to_string()));
        }
        if self.audio.channels == 0 {
            return Err(AudioError::Config("channels must be greater than 0".to_string()));
        }
        if self.audio.time_slice_ms == 0 {
            return Err(AudioError::Config("time_slice_ms must be greater than 0".to_string()));
        }
        if self.audio.buffers_before_playback == 0 {
            return Err(AudioError::Config(
                "buffers_before_playback must be greater than 0".to_string(),
            ));
        }
        if self.timing.tick_ms == 0 {
            return Err(AudioError::Config("tick_ms must be greater than 0".to_string()));
        }
        if self.timing.queue_depth_threshold == 0 {
            return Err(AudioError::Config(
                "queue_depth_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl AudioSettings {
    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }
}

impl TimingSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.timing.settle_delay(), Duration::from_millis(200));
        assert_eq!(config.timing.tick(), Duration::from_millis(10));
        assert_eq!(config.timing.queue_depth_threshold, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RelayConfig::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.timing.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = RelayConfig::from_toml_str(
            r#"
            [audio]
            sample_rate = 48000
            channels = 2

            [timing]
            tick_ms = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.timing.tick_ms, 5);
        // Untouched fields keep their defaults
        assert_eq!(config.audio.time_slice_ms, 500);
        assert_eq!(config.timing.settle_delay_ms, 200);
    }

    #[test]
    fn test_toml_invalid_value_rejected() {
        let result = RelayConfig::from_toml_str("[timing]\nqueue_depth_threshold = 0\n");
        assert!(matches!(result, Err(AudioError::Config(_))));
    }
}
