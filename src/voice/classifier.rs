//! Per-frame speech classification
//!
//! Frames follow the usual VAD constraints: 8/16/32/48 kHz, 10/20/30 ms,
//! 16-bit PCM. Anything else is rejected so the caller can treat it as
//! silence.

use thiserror::Error;

use super::format::pcm16_samples;

/// Sample rates a classifier accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8000, 16000, 32000, 48000];

/// Frame durations a classifier accepts, in milliseconds
pub const SUPPORTED_FRAME_MS: [u32; 3] = [10, 20, 30];

/// RMS thresholds indexed by aggressiveness mode (0 = least aggressive)
const MODE_THRESHOLDS: [f32; 4] = [0.01, 0.02, 0.03, 0.05];

/// Reasons a classifier rejects a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// Sample rate outside [`SUPPORTED_SAMPLE_RATES`]
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Frame length does not match a 10/20/30 ms frame
    #[error("invalid frame length: {len} bytes at {sample_rate} Hz")]
    InvalidFrameLength {
        /// Frame length in bytes
        len: usize,
        /// Sample rate the frame was classified at
        sample_rate: u32,
    },
}

/// Decides whether a single frame contains speech
pub trait SpeechClassifier {
    /// Classify one frame of little-endian 16-bit PCM
    ///
    /// # Errors
    ///
    /// Returns [`ClassificationError`] for malformed frames
    fn is_speech(&mut self, frame: &[u8], sample_rate: u32) -> Result<bool, ClassificationError>;
}

impl<C: SpeechClassifier + ?Sized> SpeechClassifier for Box<C> {
    fn is_speech(&mut self, frame: &[u8], sample_rate: u32) -> Result<bool, ClassificationError> {
        (**self).is_speech(frame, sample_rate)
    }
}

/// Energy-based voice activity classifier
///
/// Compares the RMS energy of a frame against a threshold chosen by the
/// aggressiveness mode; higher modes need louder input to count as speech.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    threshold: f32,
    channels: u16,
}

impl EnergyClassifier {
    /// Create a classifier for the given aggressiveness mode (clamped to 0..=3)
    #[must_use]
    pub fn new(mode: u8, channels: u16) -> Self {
        let mode = usize::from(mode.min(3));
        Self {
            threshold: MODE_THRESHOLDS[mode],
            channels: channels.max(1),
        }
    }

    /// Create a classifier with an explicit RMS threshold
    #[must_use]
    pub const fn with_threshold(threshold: f32, channels: u16) -> Self {
        Self {
            threshold,
            channels,
        }
    }

    /// RMS threshold in use
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    fn validate(&self, frame: &[u8], sample_rate: u32) -> Result<(), ClassificationError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(ClassificationError::UnsupportedSampleRate(sample_rate));
        }

        let bytes_per_ms = sample_rate as usize / 1000 * 2 * usize::from(self.channels);
        let valid = SUPPORTED_FRAME_MS
            .iter()
            .any(|&ms| frame.len() == bytes_per_ms * ms as usize);

        if valid {
            Ok(())
        } else {
            Err(ClassificationError::InvalidFrameLength {
                len: frame.len(),
                sample_rate,
            })
        }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(3, 1)
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &[u8], sample_rate: u32) -> Result<bool, ClassificationError> {
        self.validate(frame, sample_rate)?;
        let energy = calculate_energy(frame);
        tracing::trace!(energy, threshold = self.threshold, "frame energy");
        Ok(energy > self.threshold)
    }
}

/// Calculate normalized RMS energy of 16-bit PCM bytes
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(pcm: &[u8]) -> f32 {
    let count = pcm.len() / 2;
    if count == 0 {
        return 0.0;
    }

    let sum_squares: f32 = pcm16_samples(pcm)
        .map(|s| {
            let s = f32::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / count as f32).sqrt()
}
