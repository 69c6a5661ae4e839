//! PCM stream format and WAV container codec

use std::io::Cursor;

use crate::{Error, Result};

/// Width of a signed 16-bit PCM sample in bytes
pub const PCM16_WIDTH: u16 = 2;

/// Raw PCM layout shared by every frame of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bytes per sample
    pub sample_width: u16,
}

impl AudioFormat {
    /// Signed 16-bit little-endian PCM
    #[must_use]
    pub const fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_width: PCM16_WIDTH,
        }
    }

    /// Samples per channel covering `duration_ms`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn samples_for(&self, duration_ms: u32) -> usize {
        (self.sample_rate as u64 * duration_ms as u64 / 1000) as usize
    }

    /// Bytes in one interleaved sample frame (all channels)
    #[must_use]
    pub const fn block_align(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }

    /// Bytes covering `duration_ms`
    #[must_use]
    pub const fn bytes_for(&self, duration_ms: u32) -> usize {
        self.samples_for(duration_ms) * self.block_align()
    }

    /// Duration in milliseconds of `len` bytes of audio
    #[must_use]
    pub fn duration_ms(&self, len: usize) -> u64 {
        let per_second = u64::from(self.sample_rate) * self.block_align() as u64;
        if per_second == 0 {
            return 0;
        }
        len as u64 * 1000 / per_second
    }

    fn wav_spec(self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.sample_width * 8,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Container tag carried alongside encoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// RIFF/WAVE
    Wav,
}

impl Container {
    /// File extension / format name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "wav",
        }
    }
}

/// Encoded audio handed to a segment consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Format embedded in the container header
    pub format: AudioFormat,
    /// Container kind
    pub container: Container,
    /// Container bytes, header included
    pub data: Vec<u8>,
}

/// Encode little-endian 16-bit PCM bytes as a WAV file
///
/// # Errors
///
/// Returns error if the format is not 16-bit or WAV encoding fails
pub fn encode_wav(format: AudioFormat, pcm: &[u8]) -> Result<Vec<u8>> {
    if format.sample_width != PCM16_WIDTH {
        return Err(Error::Audio(format!(
            "unsupported sample width: {} bytes",
            format.sample_width
        )));
    }

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, format.wav_spec())?;
        for sample in pcm16_samples(pcm) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Decode a 16-bit PCM WAV file into its format and raw little-endian samples
///
/// # Errors
///
/// Returns error if the data is not a 16-bit integer WAV file
pub fn decode_wav(data: &[u8]) -> Result<(AudioFormat, Vec<u8>)> {
    let mut reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();

    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Audio(format!(
            "unsupported wav encoding: {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }

    Ok((AudioFormat::pcm16(spec.sample_rate, spec.channels), pcm))
}

/// Iterate little-endian 16-bit samples; a trailing odd byte is ignored
pub fn pcm16_samples(pcm: &[u8]) -> impl Iterator<Item = i16> + '_ {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Convert f32 samples in [-1.0, 1.0] to little-endian 16-bit PCM bytes
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&sample_i16.to_le_bytes());
    }
    out
}
