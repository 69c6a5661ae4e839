//! Frame sources: microphone capture and WAV files

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::format::{AudioFormat, f32_to_pcm16};
use super::Frame;
use crate::{Error, Result};

/// How long a blocking read waits for audio before declaring the device dead
const READ_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured audio kept before the oldest bytes are dropped
const MAX_BUFFERED_SECONDS: usize = 10;

/// Blocking producer of fixed-size PCM frames
pub trait FrameSource {
    /// Read exactly `samples` samples per channel
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying device or file fails
    fn read(&mut self, samples: usize) -> Result<Option<Frame>>;

    /// Release the underlying device or file
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self, samples: usize) -> Result<Option<Frame>> {
        (**self).read(samples)
    }

    fn close(&mut self) {
        (**self).close();
    }
}

#[derive(Default)]
struct CaptureBuffer {
    bytes: VecDeque<u8>,
    failure: Option<String>,
}

type SharedCapture = Arc<(Mutex<CaptureBuffer>, Condvar)>;

/// Captures 16-bit PCM frames from the default input device
///
/// The stream is not `Send`; read from the thread that opened it.
pub struct MicrophoneSource {
    format: AudioFormat,
    shared: SharedCapture,
    stream: Option<Stream>,
    stall_timeout: Duration,
}

impl MicrophoneSource {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports `format`
    pub fn open(format: AudioFormat) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate() <= SampleRate(format.sample_rate)
                    && c.max_sample_rate() >= SampleRate(format.sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(format.sample_rate))
            .config();

        let shared: SharedCapture = Arc::new((Mutex::new(CaptureBuffer::default()), Condvar::new()));
        let max_bytes = format.bytes_for(1000) * MAX_BUFFERED_SECONDS;

        let data_shared = Arc::clone(&shared);
        let error_shared = Arc::clone(&shared);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let (lock, available) = &*data_shared;
                    let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    buf.bytes.extend(f32_to_pcm16(data));
                    let overflow = buf.bytes.len().saturating_sub(max_bytes);
                    if overflow > 0 {
                        buf.bytes.drain(..overflow);
                    }
                    available.notify_one();
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let (lock, available) = &*error_shared;
                    let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    buf.failure = Some(err.to_string());
                    available.notify_all();
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "microphone capture started"
        );

        Ok(Self {
            format,
            shared,
            stream: Some(stream),
            stall_timeout: READ_STALL_TIMEOUT,
        })
    }

    /// Format of the captured frames
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl FrameSource for MicrophoneSource {
    fn read(&mut self, samples: usize) -> Result<Option<Frame>> {
        if self.stream.is_none() {
            return Err(Error::Input("microphone closed".to_string()));
        }

        let needed = samples * self.format.block_align();
        let deadline = Instant::now() + self.stall_timeout;
        let (lock, available) = &*self.shared;
        let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(failure) = buf.failure.take() {
                return Err(Error::Input(failure));
            }
            if buf.bytes.len() >= needed {
                return Ok(Some(buf.bytes.drain(..needed).collect()));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Input("input stream stalled".to_string()));
            }
            buf = available
                .wait_timeout(buf, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone capture stopped");
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reads fixed-size frames from a 16-bit PCM WAV file
pub struct WavFileSource {
    format: AudioFormat,
    reader: Option<hound::WavReader<BufReader<File>>>,
}

impl WavFileSource {
    /// Open a WAV file for framing
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not 16-bit integer PCM
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(Error::Audio(format!(
                "{}: expected 16-bit PCM, got {} bit {:?}",
                path.as_ref().display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        tracing::debug!(
            path = %path.as_ref().display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "opened wav source"
        );

        Ok(Self {
            format: AudioFormat::pcm16(spec.sample_rate, spec.channels),
            reader: Some(reader),
        })
    }

    /// Format of the file's frames
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }
}

impl FrameSource for WavFileSource {
    fn read(&mut self, samples: usize) -> Result<Option<Frame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let wanted = samples * usize::from(self.format.channels);
        let mut frame = Vec::with_capacity(wanted * 2);
        for sample in reader.samples::<i16>().take(wanted) {
            frame.extend_from_slice(&sample?.to_le_bytes());
        }

        if frame.is_empty() {
            return Ok(None);
        }

        // Zero-pad the final partial frame
        frame.resize(wanted * 2, 0);
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
