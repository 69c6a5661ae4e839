//! Voice segmentation integration tests
//!
//! Tests segmentation without requiring audio hardware

use std::io::Cursor;
use std::sync::atomic::Ordering;

use parley::config::SegmenterConfig;
use parley::voice::{
    AudioFormat, ClassificationError, Container, EnergyClassifier, SegmenterState,
    SpeechClassifier, StopSignal, VoiceSegmenter, WavFileSource, decode_wav,
};

mod common;

use common::{SAMPLE_RATE, VecSource, silence_frames, speech_frames};

fn segmenter() -> VoiceSegmenter<EnergyClassifier> {
    VoiceSegmenter::new(&SegmenterConfig::default(), EnergyClassifier::default()).unwrap()
}

fn utterance(lead: usize, speech: usize, trail: usize) -> Vec<Vec<u8>> {
    let mut frames = silence_frames(lead);
    frames.extend(speech_frames(speech));
    frames.extend(silence_frames(trail));
    frames
}

/// Delegates to an energy classifier but rejects one frame
struct FlakyClassifier {
    inner: EnergyClassifier,
    fail_at: usize,
    seen: usize,
}

impl SpeechClassifier for FlakyClassifier {
    fn is_speech(&mut self, frame: &[u8], sample_rate: u32) -> Result<bool, ClassificationError> {
        let index = self.seen;
        self.seen += 1;
        if index == self.fail_at {
            return Err(ClassificationError::InvalidFrameLength {
                len: frame.len(),
                sample_rate,
            });
        }
        self.inner.is_speech(frame, sample_rate)
    }
}

#[test]
fn test_single_utterance_yields_one_segment() {
    let mut segmenter = segmenter();
    let source = VecSource::new(utterance(20, 30, 20));

    let segments: Vec<_> = segmenter
        .segments(source)
        .collect::<parley::Result<Vec<_>>>()
        .unwrap();

    assert_eq!(segments.len(), 1);
    // Window of 10 buffered frames, 20 more voiced, 10 trailing silent
    assert_eq!(segments[0].frame_count(), 40);
    assert!(segments[0].frame_count() >= 20);
    assert_eq!(segments[0].format(), AudioFormat::pcm16(SAMPLE_RATE, 1));
    assert_eq!(segments[0].duration_ms(), 1200);
}

#[test]
fn test_silence_yields_nothing() {
    let mut segmenter = segmenter();
    for len in [0, 1, 9, 10, 500] {
        let source = VecSource::new(silence_frames(len));
        assert_eq!(segmenter.segments(source).count(), 0);
    }
}

#[test]
fn test_two_utterances() {
    let mut segmenter = segmenter();
    let mut frames = utterance(5, 15, 15);
    frames.extend(utterance(0, 15, 15));

    let segments: Vec<_> = segmenter.segments(VecSource::new(frames)).collect();
    assert_eq!(segments.len(), 2);
    assert!(segments.iter().all(Result::is_ok));
}

#[test]
fn test_classifier_failure_does_not_stop_loop() {
    // Reject the frame that would otherwise complete the voiced window
    let classifier = FlakyClassifier {
        inner: EnergyClassifier::default(),
        fail_at: 29,
        seen: 0,
    };
    let mut segmenter = VoiceSegmenter::new(&SegmenterConfig::default(), classifier).unwrap();

    let segments: Vec<_> = segmenter
        .segments(VecSource::new(utterance(20, 30, 20)))
        .collect::<parley::Result<Vec<_>>>()
        .unwrap();

    // Frame 29 counts as silence, frames 30.. still trigger and release
    assert_eq!(segments.len(), 1);
}

#[test]
fn test_malformed_frames_count_as_silence() {
    let mut segmenter = segmenter();
    let frames = vec![vec![0x7f; 100]; 50];
    assert_eq!(segmenter.segments(VecSource::new(frames)).count(), 0);
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_read_error_surfaces_once_and_closes_source() {
    let mut segmenter = segmenter();
    let source = VecSource::new(utterance(20, 30, 20)).failing_after(25);
    let closed = source.close_counter();

    let mut segments = segmenter.segments(source);
    let first = segments.next().unwrap();
    assert!(matches!(first, Err(parley::Error::Input(_))));
    assert!(segments.next().is_none());
    drop(segments);

    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_closes_source() {
    let mut segmenter = segmenter();
    let source = VecSource::new(utterance(0, 30, 20));
    let closed = source.close_counter();

    {
        let mut segments = segmenter.segments(source);
        assert!(segments.next().unwrap().is_ok());
    }
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_signal_ends_loop() {
    let mut segmenter = segmenter();
    let source = VecSource::new(utterance(20, 30, 20));
    let closed = source.close_counter();
    let stop = StopSignal::new();
    stop.trigger();

    assert_eq!(segmenter.segments(source).with_stop(stop).count(), 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_exhaustion_flushes_open_segment() {
    let mut segmenter = segmenter();
    let segments: Vec<_> = segmenter
        .segments(VecSource::new(utterance(5, 20, 0)))
        .collect();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].as_ref().unwrap().frame_count(), 20);
}

#[test]
fn test_each_invocation_starts_idle() {
    let mut segmenter = segmenter();

    // Leaves the segmenter triggered when the first source fails
    let first = VecSource::new(utterance(0, 20, 0)).failing_after(15);
    let results: Vec<_> = segmenter.segments(first).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());

    let second: Vec<_> = segmenter
        .segments(VecSource::new(silence_frames(30)))
        .collect();
    assert!(second.is_empty());
}

#[test]
fn test_segment_encodes_as_wav() {
    let mut segmenter = segmenter();
    let segment = segmenter
        .segments(VecSource::new(utterance(0, 20, 20)))
        .next()
        .unwrap()
        .unwrap();

    let encoded = segment.encode().unwrap();
    assert_eq!(encoded.container, Container::Wav);
    assert_eq!(&encoded.data[0..4], b"RIFF");
    assert_eq!(&encoded.data[8..12], b"WAVE");

    let reader = hound::WavReader::new(Cursor::new(&encoded.data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let (format, pcm) = decode_wav(&encoded.data).unwrap();
    assert_eq!(format, encoded.format);
    assert_eq!(pcm, segment.pcm());
}

#[test]
fn test_wav_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for frame in utterance(20, 30, 20) {
        for pair in frame.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .unwrap();
        }
    }
    // Trailing partial frame is padded, not dropped
    for _ in 0..100 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();

    let source = WavFileSource::open(&path).unwrap();
    assert_eq!(source.format(), AudioFormat::pcm16(SAMPLE_RATE, 1));

    let mut segmenter = segmenter();
    let segments: Vec<_> = segmenter.segments(source).collect();
    assert_eq!(segments.len(), 1);
}

#[test]
fn test_wav_file_source_rejects_float() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("float.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    writer.write_sample(0.0f32).unwrap();
    writer.finalize().unwrap();

    assert!(WavFileSource::open(&path).is_err());
}
