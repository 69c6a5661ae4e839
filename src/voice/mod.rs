//! Voice processing module
//!
//! Handles frame capture, speech segmentation, and queued playback.
//! What happens to a segment between capture and playback is up to the caller.

mod classifier;
mod format;
mod playback;
mod ring_buffer;
mod segmenter;
mod sink;
mod source;

/// Raw little-endian PCM bytes covering one frame duration
pub type Frame = Vec<u8>;

pub use classifier::{
    ClassificationError, EnergyClassifier, SUPPORTED_FRAME_MS, SUPPORTED_SAMPLE_RATES,
    SpeechClassifier, calculate_energy,
};
pub use format::{
    AudioFormat, Container, EncodedAudio, PCM16_WIDTH, decode_wav, encode_wav, f32_to_pcm16,
    pcm16_samples,
};
pub use playback::{PlaybackHandle, PlaybackQueue, SinkOpener, WorkerStatus};
pub use ring_buffer::RingBuffer;
pub use segmenter::{Segment, SegmenterState, Segments, StopSignal, VoiceSegmenter};
pub use sink::{OutputSink, SpeakerSink, WavFileSink};
pub use source::{FrameSource, MicrophoneSource, WavFileSource};
