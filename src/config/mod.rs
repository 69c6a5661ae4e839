//! Configuration management for parley
//!
//! Values resolve as env > TOML file > defaults.

pub mod file;

use std::path::{Path, PathBuf};

use crate::voice::{AudioFormat, SUPPORTED_FRAME_MS};
use crate::{Error, Result};

use file::ParleyConfigFile;

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Voice segmentation configuration
    pub segmenter: SegmenterConfig,

    /// Playback queue configuration
    pub playback: PlaybackConfig,

    /// Directory captured segments are written to
    pub segments_dir: PathBuf,
}

/// Voice segmentation configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Input sample rate in Hz
    pub sample_rate: u32,

    /// Input channel count
    pub channels: u16,

    /// Frame duration in ms
    pub frame_duration_ms: u32,

    /// Sliding window duration in ms
    pub padding_duration_ms: u32,

    /// Classifier aggressiveness (0-3)
    pub vad_mode: u8,

    /// Voiced share of the window that starts a segment
    pub trigger_ratio: f32,

    /// Unvoiced share of the window that ends a segment
    pub release_ratio: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 30,
            padding_duration_ms: 300,
            vad_mode: 3,
            trigger_ratio: 0.9,
            release_ratio: 0.9,
        }
    }
}

impl SegmenterConfig {
    /// PCM format of input frames
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        AudioFormat::pcm16(self.sample_rate, self.channels)
    }

    /// Sliding window length in frames
    #[must_use]
    pub const fn padding_frames(&self) -> usize {
        if self.frame_duration_ms == 0 {
            return 0;
        }
        (self.padding_duration_ms / self.frame_duration_ms) as usize
    }

    /// Check that the settings describe a usable segmenter
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("segmenter.sample_rate must be non-zero".to_string()));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(Error::Config(format!(
                "segmenter.channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.frame_duration_ms == 0 {
            return Err(Error::Config(
                "segmenter.frame_duration_ms must be non-zero".to_string(),
            ));
        }
        if !SUPPORTED_FRAME_MS.contains(&self.frame_duration_ms) {
            tracing::warn!(
                frame_ms = self.frame_duration_ms,
                "frame duration unsupported by the classifier, every frame will count as silence"
            );
        }
        if self.padding_frames() == 0 {
            return Err(Error::Config(format!(
                "segmenter.padding_duration_ms ({}) must cover at least one {} ms frame",
                self.padding_duration_ms, self.frame_duration_ms
            )));
        }
        for (name, ratio) in [
            ("trigger_ratio", self.trigger_ratio),
            ("release_ratio", self.release_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(Error::Config(format!(
                    "segmenter.{name} must be in (0, 1], got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

/// Playback queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u16,

    /// Bytes per sink write
    pub chunk_size: usize,

    /// How long `stop()` waits for the worker, in ms
    pub stop_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            chunk_size: 1024,
            stop_timeout_ms: 2000,
        }
    }
}

impl PlaybackConfig {
    /// PCM format written to the sink
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        AudioFormat::pcm16(self.sample_rate, self.channels)
    }

    /// Check that the settings describe a usable playback queue
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("playback.sample_rate must be non-zero".to_string()));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(Error::Config(format!(
                "playback.channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("playback.chunk_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Return the default directory for captured segments, `~/.local/share/parley/segments` on Linux
pub fn default_segments_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("segments"),
        |d| d.data_dir().join("parley").join("segments"),
    )
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// An explicit `path` must exist and parse; the default path is optional.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file is unreadable or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with an environment lookup and defaults
    ///
    /// # Errors
    ///
    /// Returns error if an env override does not parse or the result is invalid
    pub fn resolve<F>(fc: ParleyConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seg_defaults = SegmenterConfig::default();
        let segmenter = SegmenterConfig {
            sample_rate: env_parse(&env, "PARLEY_SAMPLE_RATE")?
                .or(fc.segmenter.sample_rate)
                .unwrap_or(seg_defaults.sample_rate),
            channels: fc.segmenter.channels.unwrap_or(seg_defaults.channels),
            frame_duration_ms: env_parse(&env, "PARLEY_FRAME_MS")?
                .or(fc.segmenter.frame_duration_ms)
                .unwrap_or(seg_defaults.frame_duration_ms),
            padding_duration_ms: env_parse(&env, "PARLEY_PADDING_MS")?
                .or(fc.segmenter.padding_duration_ms)
                .unwrap_or(seg_defaults.padding_duration_ms),
            vad_mode: env_parse(&env, "PARLEY_VAD_MODE")?
                .or(fc.segmenter.vad_mode)
                .unwrap_or(seg_defaults.vad_mode),
            trigger_ratio: fc.segmenter.trigger_ratio.unwrap_or(seg_defaults.trigger_ratio),
            release_ratio: fc.segmenter.release_ratio.unwrap_or(seg_defaults.release_ratio),
        };

        let play_defaults = PlaybackConfig::default();
        let playback = PlaybackConfig {
            sample_rate: env_parse(&env, "PARLEY_PLAYBACK_RATE")?
                .or(fc.playback.sample_rate)
                .unwrap_or(play_defaults.sample_rate),
            channels: fc.playback.channels.unwrap_or(play_defaults.channels),
            chunk_size: env_parse(&env, "PARLEY_CHUNK_SIZE")?
                .or(fc.playback.chunk_size)
                .unwrap_or(play_defaults.chunk_size),
            stop_timeout_ms: fc
                .playback
                .stop_timeout_ms
                .unwrap_or(play_defaults.stop_timeout_ms),
        };

        let segments_dir = env("PARLEY_SEGMENTS_DIR")
            .or(fc.output.segments_dir)
            .map_or_else(default_segments_dir, PathBuf::from);

        let config = Self {
            segmenter,
            playback,
            segments_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found
    pub fn validate(&self) -> Result<()> {
        self.segmenter.validate()?;
        self.playback.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            playback: PlaybackConfig::default(),
            segments_dir: default_segments_dir(),
        }
    }
}

fn env_parse<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key}: invalid value {raw:?}")))
        })
        .transpose()
}
