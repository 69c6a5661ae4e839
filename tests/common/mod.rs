//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley::voice::{Frame, FrameSource, OutputSink, f32_to_pcm16};
use parley::{Error, Result};

/// Sample rate used by the synthetic frames
pub const SAMPLE_RATE: u32 = 16000;

/// Samples in a 30 ms frame at [`SAMPLE_RATE`]
pub const FRAME_SAMPLES: usize = 480;

/// Generate sine wave audio samples
pub fn generate_sine_samples(frequency: f32, num_samples: usize, amplitude: f32) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// `count` frames of a 440 Hz tone
pub fn speech_frames(count: usize) -> Vec<Frame> {
    let pcm = f32_to_pcm16(&generate_sine_samples(440.0, count * FRAME_SAMPLES, 0.3));
    pcm.chunks(FRAME_SAMPLES * 2).map(<[u8]>::to_vec).collect()
}

/// `count` frames of digital silence
pub fn silence_frames(count: usize) -> Vec<Frame> {
    vec![vec![0u8; FRAME_SAMPLES * 2]; count]
}

/// Frame source replaying a fixed list of frames
pub struct VecSource {
    frames: VecDeque<Frame>,
    fail_after: Option<usize>,
    served: usize,
    pub closed: Arc<AtomicUsize>,
}

impl VecSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            fail_after: None,
            served: 0,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the read after `count` frames were served
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }
}

impl FrameSource for VecSource {
    fn read(&mut self, _samples: usize) -> Result<Option<Frame>> {
        if self.fail_after.is_some_and(|limit| self.served >= limit) {
            return Err(Error::Input("device closed".to_string()));
        }
        self.served += 1;
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Output sink that records every chunk it receives
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    pub closed: Arc<AtomicUsize>,
    fail_on_write: Option<usize>,
    delay: Option<Duration>,
    writes: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the nth write (0-based)
    pub fn failing_on(mut self, write: usize) -> Self {
        self.fail_on_write = Some(write);
        self
    }

    /// Sleep before accepting each chunk
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.chunks().concat()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn boxed(&self) -> Box<dyn OutputSink> {
        Box::new(self.clone())
    }
}

impl OutputSink for RecordingSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_write == Some(n) {
            return Err(Error::Output("device unplugged".to_string()));
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.chunks.lock().unwrap().push(chunk.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
