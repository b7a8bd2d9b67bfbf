use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::{AudioCodec, Container};
use crate::{Error, Result};

/// Slowest allowed position poll; the poller must tick at 2 Hz or faster.
pub const MAX_POLL_INTERVAL_MS: u64 = 500;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub player: PlayerConfig,
    pub record: RecordConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.player.validate()?;
        self.record.validate()
    }
}

/// Configuration of the owner context and its poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub poll_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: MAX_POLL_INTERVAL_MS,
        }
    }
}

impl PlayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(Error::Config(format!(
                "poll_interval_ms must be within 1..={MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

/// Encoding profile used for microphone recordings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub container: Container,
    pub codec: AudioCodec,
    pub bitrate: u32,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            container: Container::Mpeg4,
            codec: AudioCodec::Aac,
            bitrate: 192_000,
        }
    }
}

impl RecordConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bitrate == 0 {
            return Err(Error::Config("record bitrate must be positive".into()));
        }
        Ok(())
    }
}
