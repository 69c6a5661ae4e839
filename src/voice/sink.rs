//! Output sinks: speaker playback and WAV files

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::format::{AudioFormat, PCM16_WIDTH, pcm16_samples};
use crate::{Error, Result};

/// Audio the speaker buffer holds before `write` blocks
const SPEAKER_BUFFER_MS: u32 = 500;

/// How long a blocked write waits for the device to consume audio
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking consumer of PCM chunks
pub trait OutputSink: Send {
    /// Write one chunk, blocking until the sink accepts it
    ///
    /// # Errors
    ///
    /// Returns error if the device or file fails
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush and release the sink
    ///
    /// # Errors
    ///
    /// Returns error if pending audio cannot be flushed
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        (**self).write(chunk)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[derive(Default)]
struct PlaybackBuffer {
    samples: VecDeque<i16>,
    failure: Option<String>,
}

type SharedPlayback = Arc<(Mutex<PlaybackBuffer>, Condvar)>;

/// Plays 16-bit PCM chunks on the default output device
///
/// The cpal stream lives on a dedicated device thread so the sink itself can
/// be moved into a playback worker.
pub struct SpeakerSink {
    format: AudioFormat,
    shared: SharedPlayback,
    capacity: usize,
    shutdown: Option<mpsc::Sender<()>>,
    device_thread: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports `format`
    pub fn open(format: AudioFormat) -> Result<Self> {
        if format.sample_width != PCM16_WIDTH {
            return Err(Error::Audio(format!(
                "unsupported sample width: {} bytes",
                format.sample_width
            )));
        }
        if !(1..=2).contains(&format.channels) {
            return Err(Error::Audio(format!(
                "unsupported channel count: {}",
                format.channels
            )));
        }

        let shared: SharedPlayback =
            Arc::new((Mutex::new(PlaybackBuffer::default()), Condvar::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let device_shared = Arc::clone(&shared);
        let device_thread = std::thread::Builder::new()
            .name("parley-speaker".to_string())
            .spawn(move || {
                let stream = match build_output_stream(format, device_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until the sink closes or is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = device_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = device_thread.join();
                return Err(Error::Audio("speaker thread exited during setup".to_string()));
            }
        }

        Ok(Self {
            format,
            shared,
            capacity: format.samples_for(SPEAKER_BUFFER_MS) * usize::from(format.channels),
            shutdown: Some(shutdown_tx),
            device_thread: Some(device_thread),
        })
    }

    /// Format the sink expects
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    fn wait_drained(&self) {
        let (lock, consumed) = &*self.shared;
        let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let pending_ms = self.format.duration_ms(buf.samples.len() * 2);
        let deadline = Instant::now() + Duration::from_millis(pending_ms + 500);

        while !buf.samples.is_empty() && buf.failure.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(pending = buf.samples.len(), "speaker drain timed out");
                break;
            }
            buf = consumed
                .wait_timeout(buf, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl OutputSink for SpeakerSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.shutdown.is_none() {
            return Err(Error::Output("speaker closed".to_string()));
        }

        let samples: Vec<i16> = pcm16_samples(chunk).collect();
        let deadline = Instant::now() + WRITE_STALL_TIMEOUT;
        let (lock, consumed) = &*self.shared;
        let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(failure) = &buf.failure {
                return Err(Error::Output(failure.clone()));
            }
            if buf.samples.is_empty() || buf.samples.len() + samples.len() <= self.capacity {
                buf.samples.extend(samples);
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Output("output stream stalled".to_string()));
            }
            buf = consumed
                .wait_timeout(buf, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };

        self.wait_drained();

        // Small delay to ensure audio finishes
        std::thread::sleep(Duration::from_millis(100));

        drop(shutdown);
        if let Some(handle) = self.device_thread.take() {
            handle
                .join()
                .map_err(|_| Error::Audio("speaker thread panicked".to_string()))?;
        }

        tracing::debug!("speaker closed");
        Ok(())
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close speaker");
        }
    }
}

fn build_output_stream(format: AudioFormat, shared: SharedPlayback) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(format.sample_rate);
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == format.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .or_else(|| {
            // Fallback: fan mono out to stereo
            if format.channels != 1 {
                return None;
            }
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config.with_sample_rate(rate).config();
    let device_channels = usize::from(config.channels);
    let source_channels = usize::from(format.channels);

    let data_shared = Arc::clone(&shared);
    let error_shared = shared;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let (lock, consumed) = &*data_shared;
                let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let mut source = [0i16; 2];

                for frame in data.chunks_mut(device_channels) {
                    for slot in source.iter_mut().take(source_channels) {
                        *slot = buf.samples.pop_front().unwrap_or(0);
                    }
                    for (i, out) in frame.iter_mut().enumerate() {
                        *out = f32::from(source[i % source_channels]) / 32768.0;
                    }
                }

                consumed.notify_all();
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                let (lock, consumed) = &*error_shared;
                let mut buf = lock.lock().unwrap_or_else(PoisonError::into_inner);
                buf.failure = Some(err.to_string());
                consumed.notify_all();
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = format.sample_rate,
        channels = config.channels,
        "speaker opened"
    );

    Ok(stream)
}

/// Writes PCM chunks into a WAV file
pub struct WavFileSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavFileSink {
    /// Create (or truncate) a WAV file for `format`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created
    pub fn create(path: impl AsRef<Path>, format: AudioFormat) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.sample_width * 8,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec)?;

        tracing::debug!(path = %path.as_ref().display(), "wav sink created");
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl OutputSink for WavFileSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Output("wav sink closed".to_string()))?;
        for sample in pcm16_samples(chunk) {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to finalize wav sink");
        }
    }
}
