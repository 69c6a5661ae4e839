//! Voice-activity gated speech segmentation
//!
//! Frames are classified one at a time and pushed into a sliding window.
//! When the share of voiced frames in a full window passes the trigger ratio
//! the segmenter starts collecting; when the share of unvoiced frames passes
//! the release ratio the collected frames are emitted as one [`Segment`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::classifier::SpeechClassifier;
use super::format::{AudioFormat, Container, EncodedAudio, encode_wav};
use super::ring_buffer::RingBuffer;
use super::source::FrameSource;
use super::Frame;
use crate::config::SegmenterConfig;
use crate::Result;

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for a voiced window
    Idle,
    /// Collecting a speech segment
    Triggered,
}

/// A contiguous run of frames judged to contain speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    format: AudioFormat,
    frames: Vec<Frame>,
}

impl Segment {
    /// Build a segment from frames in capture order
    #[must_use]
    pub const fn new(format: AudioFormat, frames: Vec<Frame>) -> Self {
        Self { format, frames }
    }

    /// Format of the segment's frames
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Frames in capture order
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of frames
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Concatenated raw PCM
    #[must_use]
    pub fn pcm(&self) -> Vec<u8> {
        self.frames.concat()
    }

    /// Duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.format
            .duration_ms(self.frames.iter().map(Vec::len).sum())
    }

    /// Encode as a WAV container tagged with the segment's format
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn encode(&self) -> Result<EncodedAudio> {
        Ok(EncodedAudio {
            format: self.format,
            container: Container::Wav,
            data: encode_wav(self.format, &self.pcm())?,
        })
    }
}

/// Shared flag that ends a running segment loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Create an untriggered signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this signal to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Splits a frame stream into speech segments
pub struct VoiceSegmenter<C> {
    classifier: C,
    format: AudioFormat,
    frame_duration_ms: u32,
    trigger_ratio: f32,
    release_ratio: f32,
    ring: RingBuffer<Frame>,
    state: SegmenterState,
    voiced_frames: Vec<Frame>,
    frames_seen: u64,
}

impl<C: SpeechClassifier> VoiceSegmenter<C> {
    /// Create a segmenter
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings are invalid, including a
    /// padding window shorter than one frame
    pub fn new(config: &SegmenterConfig, classifier: C) -> Result<Self> {
        config.validate()?;
        let ring = RingBuffer::new(config.padding_frames())?;

        tracing::debug!(
            sample_rate = config.sample_rate,
            frame_ms = config.frame_duration_ms,
            window = ring.capacity(),
            trigger_ratio = config.trigger_ratio,
            release_ratio = config.release_ratio,
            "voice segmenter initialized"
        );

        Ok(Self {
            classifier,
            format: config.format(),
            frame_duration_ms: config.frame_duration_ms,
            trigger_ratio: config.trigger_ratio,
            release_ratio: config.release_ratio,
            ring,
            state: SegmenterState::Idle,
            voiced_frames: Vec::new(),
            frames_seen: 0,
        })
    }

    /// Classify one frame and advance the state machine
    ///
    /// Returns a segment when silence follows collected speech. A frame the
    /// classifier rejects counts as silence.
    pub fn process_frame(&mut self, frame: Frame) -> Option<Segment> {
        let is_speech = match self.classifier.is_speech(&frame, self.format.sample_rate) {
            Ok(speech) => speech,
            Err(e) => {
                tracing::warn!(frame = self.frames_seen, error = %e, "invalid input to classifier");
                false
            }
        };
        self.frames_seen += 1;

        match self.state {
            SegmenterState::Idle => {
                self.ring.push(frame, is_speech);
                if self.exceeds(self.ring.voiced(), self.trigger_ratio) {
                    tracing::debug!("speech detected, starting collection");
                    self.state = SegmenterState::Triggered;
                    self.voiced_frames = self.ring.drain();
                }
                None
            }
            SegmenterState::Triggered => {
                self.voiced_frames.push(frame);
                // Frame is owned by the segment now; the window only needs its tag
                self.ring.push(Vec::new(), is_speech);

                if self.exceeds(self.ring.unvoiced(), self.release_ratio) {
                    tracing::debug!(
                        frames = self.voiced_frames.len(),
                        "silence detected, emitting speech segment"
                    );
                    self.ring.clear();
                    self.state = SegmenterState::Idle;
                    return Some(self.take_segment());
                }
                None
            }
        }
    }

    /// Emit whatever has been collected if a segment is in progress
    pub fn flush(&mut self) -> Option<Segment> {
        if self.state != SegmenterState::Triggered || self.voiced_frames.is_empty() {
            return None;
        }

        tracing::debug!(frames = self.voiced_frames.len(), "flushing partial segment");
        self.ring.clear();
        self.state = SegmenterState::Idle;
        Some(self.take_segment())
    }

    /// Return to idle and discard buffered audio
    pub fn reset(&mut self) {
        self.ring.clear();
        self.voiced_frames.clear();
        self.state = SegmenterState::Idle;
        self.frames_seen = 0;
    }

    /// Pull frames from `source` and yield segments until stopped or exhausted
    ///
    /// State is reset at the start of every invocation. The source is closed
    /// when the returned iterator finishes or is dropped.
    pub fn segments<S: FrameSource>(&mut self, source: S) -> Segments<'_, C, S> {
        self.reset();
        tracing::info!("ready to go...");
        let frame_samples = self.frame_samples();
        Segments {
            segmenter: self,
            source,
            stop: StopSignal::new(),
            frame_samples,
            finished: false,
        }
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Format frames are expected in
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Samples per channel in one frame
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        self.format.samples_for(self.frame_duration_ms)
    }

    /// Sliding window length in frames
    #[must_use]
    pub fn window_frames(&self) -> usize {
        self.ring.capacity()
    }

    /// Frames collected for the segment in progress
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.voiced_frames.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn exceeds(&self, count: usize, ratio: f32) -> bool {
        count as f32 > ratio * self.ring.capacity() as f32
    }

    fn take_segment(&mut self) -> Segment {
        Segment::new(self.format, std::mem::take(&mut self.voiced_frames))
    }
}

/// Lazy pull loop over a frame source
pub struct Segments<'a, C: SpeechClassifier, S: FrameSource> {
    segmenter: &'a mut VoiceSegmenter<C>,
    source: S,
    stop: StopSignal,
    frame_samples: usize,
    finished: bool,
}

impl<C: SpeechClassifier, S: FrameSource> Segments<'_, C, S> {
    /// End the loop when `stop` is triggered
    #[must_use]
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Signal that ends this loop
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.source.close();
            tracing::debug!("frame source closed");
        }
    }
}

impl<C: SpeechClassifier, S: FrameSource> Iterator for Segments<'_, C, S> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            if self.stop.is_triggered() {
                tracing::info!("stopped by caller");
                self.finish();
                return None;
            }

            match self.source.read(self.frame_samples) {
                Ok(Some(frame)) => {
                    if let Some(segment) = self.segmenter.process_frame(frame) {
                        return Some(Ok(segment));
                    }
                }
                Ok(None) => {
                    tracing::debug!("frame source exhausted");
                    let tail = self.segmenter.flush();
                    self.finish();
                    return tail.map(Ok);
                }
                Err(e) => {
                    tracing::error!(error = %e, "error during audio stream");
                    self.finish();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<C: SpeechClassifier, S: FrameSource> Drop for Segments<'_, C, S> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::ClassificationError;

    /// Treats a frame as speech when its first byte is non-zero
    struct MarkerClassifier;

    impl SpeechClassifier for MarkerClassifier {
        fn is_speech(&mut self, frame: &[u8], _: u32) -> std::result::Result<bool, ClassificationError> {
            Ok(frame.first().copied().unwrap_or(0) != 0)
        }
    }

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            frame_duration_ms: 30,
            padding_duration_ms: 300,
            ..SegmenterConfig::default()
        }
    }

    fn speech() -> Frame {
        vec![1u8; 4]
    }

    fn silence() -> Frame {
        vec![0u8; 4]
    }

    fn feed(segmenter: &mut VoiceSegmenter<MarkerClassifier>, frames: Vec<Frame>) -> Vec<Segment> {
        frames
            .into_iter()
            .filter_map(|f| segmenter.process_frame(f))
            .collect()
    }

    #[test]
    fn test_window_from_padding() {
        let segmenter = VoiceSegmenter::new(&config(), MarkerClassifier).unwrap();
        assert_eq!(segmenter.window_frames(), 10);
        assert_eq!(segmenter.frame_samples(), 480);
    }

    #[test]
    fn test_triggers_after_full_voiced_window() {
        let mut segmenter = VoiceSegmenter::new(&config(), MarkerClassifier).unwrap();

        for _ in 0..9 {
            assert!(segmenter.process_frame(speech()).is_none());
            assert_eq!(segmenter.state(), SegmenterState::Idle);
        }

        // 10 of 10 voiced exceeds 90%
        segmenter.process_frame(speech());
        assert_eq!(segmenter.state(), SegmenterState::Triggered);
        assert_eq!(segmenter.pending_frames(), 10);
    }

    #[test]
    fn test_isolated_noise_does_not_trigger() {
        let mut segmenter = VoiceSegmenter::new(&config(), MarkerClassifier).unwrap();
        let mut frames = Vec::new();
        for i in 0..100 {
            frames.push(if i % 3 == 0 { speech() } else { silence() });
        }
        assert!(feed(&mut segmenter, frames).is_empty());
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_release_emits_segment() {
        let mut segmenter = VoiceSegmenter::new(&config(), MarkerClassifier).unwrap();
        let mut frames = vec![silence(); 5];
        frames.extend(vec![speech(); 25]);
        frames.extend(vec![silence(); 10]);

        let segments = feed(&mut segmenter, frames);
        assert_eq!(segments.len(), 1);
        // 10 buffered + 15 voiced + 10 trailing silence
        assert_eq!(segments[0].frame_count(), 35);
        assert_eq!(segmenter.state(), SegmenterState::Idle);
        assert_eq!(segmenter.pending_frames(), 0);
    }

    #[test]
    fn test_brief_pause_keeps_segment_open() {
        let mut segmenter = VoiceSegmenter::new(&config(), MarkerClassifier).unwrap();
        let mut frames = vec![speech(); 12];
        frames.extend(vec![silence(); 5]);
        frames.extend(vec![speech(); 12]);
        frames.extend(vec![silence(); 10]);

        let segments = feed(&mut segmenter, frames);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_asymmetric_ratios() {
        let cfg = SegmenterConfig {
            trigger_ratio: 0.5,
            release_ratio: 0.2,
            ..config()
        };
        let mut segmenter = VoiceSegmenter::new(&cfg, MarkerClassifier).unwrap();

        // 6 of 10 voiced passes a 50% trigger
        let mut frames = vec![silence(); 4];
        frames.extend(vec![speech(); 6]);
        assert!(feed(&mut segmenter, frames).is_empty());
        assert_eq!(segmenter.state(), SegmenterState::Triggered);

        // 3 unvoiced passes a 20% release
        let segments = feed(&mut segmenter, vec![silence(); 3]);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_flush_and_reset() {
        let mut segmenter = VoiceSegmenter::new(&config(), MarkerClassifier).unwrap();
        assert!(segmenter.flush().is_none());

        feed(&mut segmenter, vec![speech(); 12]);
        let tail = segmenter.flush().unwrap();
        assert_eq!(tail.frame_count(), 12);
        assert_eq!(segmenter.state(), SegmenterState::Idle);

        feed(&mut segmenter, vec![speech(); 12]);
        segmenter.reset();
        assert_eq!(segmenter.pending_frames(), 0);
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_padding_shorter_than_frame_rejected() {
        let cfg = SegmenterConfig {
            padding_duration_ms: 20,
            ..config()
        };
        assert!(VoiceSegmenter::new(&cfg, MarkerClassifier).is_err());
    }

    #[test]
    fn test_stop_signal_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_triggered());
        signal.trigger();
        assert!(clone.is_triggered());
    }
}
