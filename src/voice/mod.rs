//! Voice processing module
//!
//! Audio capture, the streaming transcription link, speech synthesis, and
//! playback. Orchestration lives in `daemon.rs`.

pub mod capture;
pub mod link;
pub mod playback;
pub mod synth;

pub use capture::{CaptureSession, SAMPLE_RATE};
pub use link::{LinkConfig, LinkEvent, TranscriptEvent, TranscriptionLink};
pub use playback::{PlaybackOutcome, PlaybackSession, MAX_SPEAK_CHARS};
pub use synth::{HttpSynthesizer, Synthesizer};
