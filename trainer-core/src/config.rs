//! # Configuration Module
//!
//! Tunable settings for capture, analysis cadence, playback volume and
//! meter feedback. Stored as JSON so they can be edited without a rebuild.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::AudioError;
use crate::pitch;

/// Longest analysis interval that still gives responsive visual feedback.
const MAX_ANALYSIS_INTERVAL_MS: u64 = 200;

/// Settings shared by the capture session, the tone synth and the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Preferred capture sample rate in Hz; the device may pick another.
    pub sample_rate: u32,
    /// Number of samples analyzed per tick.
    pub frame_size: usize,
    /// Time between analysis ticks in milliseconds.
    pub analysis_interval_ms: u64,
    /// Volume for reference tones that don't specify one.
    pub default_volume: f32,
    /// Recording stops by itself after this many seconds.
    pub max_recording_secs: Option<u64>,
    /// Offsets within this many cents count as in tune.
    pub in_tune_cents: f64,
    /// Offsets within this many cents count as close.
    pub close_cents: f64,
    /// Number of frames averaged by the pitch meter.
    pub smoothing_frames: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 2048,
            analysis_interval_ms: 100,
            default_volume: crate::synth::DEFAULT_VOLUME,
            max_recording_secs: None,
            in_tune_cents: 25.0,
            close_cents: 50.0,
            smoothing_frames: 5,
        }
    }
}

impl TrainerConfig {
    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate < 8_000 {
            return Err(AudioError::InvalidConfig(format!(
                "sample_rate {} Hz is below 8000 Hz",
                self.sample_rate
            )));
        }
        let min_frame = pitch::min_frame_len(self.sample_rate);
        if self.frame_size < min_frame {
            return Err(AudioError::InvalidConfig(format!(
                "frame_size {} is shorter than {} samples needed at {} Hz",
                self.frame_size, min_frame, self.sample_rate
            )));
        }
        if self.analysis_interval_ms == 0 || self.analysis_interval_ms > MAX_ANALYSIS_INTERVAL_MS {
            return Err(AudioError::InvalidConfig(format!(
                "analysis_interval_ms must be between 1 and {MAX_ANALYSIS_INTERVAL_MS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(AudioError::InvalidConfig(
                "default_volume must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.max_recording_secs == Some(0) {
            return Err(AudioError::InvalidConfig(
                "max_recording_secs must be positive when set".to_string(),
            ));
        }
        if !(self.in_tune_cents >= 0.0 && self.close_cents >= self.in_tune_cents) {
            return Err(AudioError::InvalidConfig(
                "cent bands must satisfy 0 <= in_tune_cents <= close_cents".to_string(),
            ));
        }
        Ok(())
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    pub fn max_recording(&self) -> Option<Duration> {
        self.max_recording_secs.map(Duration::from_secs)
    }

    /// Loads and validates a configuration from a JSON file. Missing fields
    /// take their default values.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: TrainerConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("writing {}", path.as_ref().display()))?;
        Ok(())
    }
}
