//! Parley - voice I/O core for conversational assistants
//!
//! This library provides the two audio pieces that sit at either end of an
//! assistant pipeline:
//! - Voice segmentation (frame classification, ring-buffer gating, WAV segments)
//! - Queued playback (one background worker draining buffers to an output device)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌─────────────────┐  Segment (WAV)
//! │ FrameSource  ├───────────►│ VoiceSegmenter  ├──────────────►  responder
//! │ mic │ .wav   │            │ ring buffer+VAD │                  (external)
//! └──────────────┘            └─────────────────┘                      │
//!                                                                      │ audio chunks
//! ┌──────────────┐   chunks   ┌─────────────────┐   enqueue            │
//! │ OutputSink   │◄───────────┤ PlaybackQueue   │◄─────────────────────┘
//! │ speaker│.wav │            │ worker thread   │
//! └──────────────┘            └─────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use voice::{
    AudioFormat, EncodedAudio, PlaybackHandle, PlaybackQueue, Segment, SegmenterState,
    StopSignal, VoiceSegmenter, WorkerStatus,
};
