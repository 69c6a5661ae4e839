//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfigFile {
    /// Voice segmentation settings
    #[serde(default)]
    pub segmenter: SegmenterFileConfig,

    /// Playback queue settings
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Where captured segments are written
    #[serde(default)]
    pub output: OutputFileConfig,
}

/// Voice segmentation configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmenterFileConfig {
    /// Input sample rate in Hz (8000, 16000, 32000 or 48000)
    pub sample_rate: Option<u32>,

    /// Input channel count
    pub channels: Option<u16>,

    /// Frame duration in ms (10, 20 or 30)
    pub frame_duration_ms: Option<u32>,

    /// Sliding window duration in ms
    pub padding_duration_ms: Option<u32>,

    /// Classifier aggressiveness, 0-3
    pub vad_mode: Option<u8>,

    /// Voiced share of the window that starts a segment
    pub trigger_ratio: Option<f32>,

    /// Unvoiced share of the window that ends a segment
    pub release_ratio: Option<f32>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackFileConfig {
    /// Output sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Output channel count
    pub channels: Option<u16>,

    /// Bytes per sink write
    pub chunk_size: Option<usize>,

    /// How long `stop()` waits for the worker, in ms
    pub stop_timeout_ms: Option<u64>,
}

/// Segment output configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputFileConfig {
    /// Directory for captured segment WAV files
    pub segments_dir: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unknown keys
pub fn parse_config(content: &str) -> Result<ParleyConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Read and parse an explicitly requested config file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<ParleyConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
