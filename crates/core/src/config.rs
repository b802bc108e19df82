use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use beatmix_transport::{BitDepth, StretchMode};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub mix: MixSettings,
    #[serde(default)]
    pub playback: PlaybackSettings,
    #[serde(default)]
    pub beats: BeatSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: BitDepth,
    pub stretch: StretchMode,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bit_depth: BitDepth::Sixteen,
            stretch: StretchMode::Resample,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpTo {
    /// Segment whose start is closest to the target.
    #[default]
    Nearest,
    /// Segment the target falls into.
    Containing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Playback buffer budget in MiB.
    pub buffer_mb: f64,
    /// Chunks per second handed to the sink.
    pub update_freq: u32,
    pub jump_to: JumpTo,
    /// Log buffer over- and underflows.
    pub warnings: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            buffer_mb: 4.0,
            update_freq: 20,
            jump_to: JumpTo::Nearest,
            warnings: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatSettings {
    /// Tempo of the grid assumed for tracks without a beats file.
    pub fallback_bpm: f64,
}

impl Default for BeatSettings {
    fn default() -> Self {
        Self { fallback_bpm: 120.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDevice {
    #[default]
    Default,
    /// Paced in real time without touching a device.
    Null,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub device: OutputDevice,
}

impl PlaybackSettings {
    /// Samples (not frames) per chunk sent to the sink.
    pub fn chunk_samples(&self, sample_rate: u32, channels: u16) -> usize {
        let frames = (sample_rate as f64 / self.update_freq.max(1) as f64).round() as usize;
        frames * channels as usize
    }

    /// Buffer capacity in samples of `bit_depth`.
    pub fn buffer_samples(&self, bit_depth: BitDepth) -> usize {
        (self.buffer_mb * 1024.0 * 1024.0 * 8.0 / bit_depth.bits() as f64).round() as usize
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("beatmix").join("config.toml"))
    }

    /// Settings from the user config file, or the defaults when there is none.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let settings = Self::parse(&contents)?;
        log::info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| ConfigError::Invalid {
            key,
            reason: reason.to_string(),
        };

        if self.mix.sample_rate == 0 {
            return Err(invalid("mix.sample_rate", "must be positive"));
        }
        if self.mix.channels == 0 {
            return Err(invalid("mix.channels", "must be positive"));
        }
        if self.playback.update_freq == 0 {
            return Err(invalid("playback.update_freq", "must be positive"));
        }
        if !(self.beats.fallback_bpm > 0.0) {
            return Err(invalid("beats.fallback_bpm", "must be positive"));
        }

        let chunk = self.playback.chunk_samples(self.mix.sample_rate, self.mix.channels);
        let capacity = self.playback.buffer_samples(self.mix.bit_depth);
        if capacity < chunk {
            return Err(ConfigError::Invalid {
                key: "playback.buffer_mb",
                reason: format!("{capacity} samples do not hold one chunk of {chunk}"),
            });
        }
        Ok(())
    }
}
