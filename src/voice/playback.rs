//! Audio playback of synthesized replies
//!
//! Exactly one item plays at a time; starting a new one stops the active
//! one first. Stopping is always safe, and a stopped item resolves silently
//! because the controller has already moved on. Completion and failure are
//! the same outcome for the conversation: it may proceed.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use super::synth::Synthesizer;
use crate::{Error, Result};

/// Input cap for one spoken item, bounding synthesis latency and cost
pub const MAX_SPEAK_CHARS: usize = 4000;

/// Terminal state of one playback item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio played to the end
    Finished,
    /// Synthesis or playback failed; the conversation proceeds anyway
    Failed,
}

/// Plays synthesized replies, one at a time
pub struct PlaybackSession {
    synthesizer: Arc<dyn Synthesizer>,
    active: Option<Arc<AtomicBool>>,
}

impl PlaybackSession {
    /// Create a playback session backed by the given synthesizer
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            synthesizer,
            active: None,
        }
    }

    /// Synthesize and play one item
    ///
    /// The text is truncated to [`MAX_SPEAK_CHARS`]. Any active item is
    /// stopped first. The outcome arrives on `done` unless the item is
    /// stopped before it resolves.
    pub fn speak(&mut self, text: &str, done: mpsc::Sender<PlaybackOutcome>) {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        self.active = Some(Arc::clone(&stop));

        let text = truncate_chars(text, MAX_SPEAK_CHARS);
        let synthesizer = Arc::clone(&self.synthesizer);

        tokio::spawn(async move {
            let outcome = run_item(synthesizer.as_ref(), &text, &stop).await;
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let _ = done.send(outcome).await;
        });
    }

    /// Stop the active item, if any
    ///
    /// Always safe, including with nothing playing; idempotent. The caller
    /// sees the stop immediately; device teardown finishes in the
    /// background.
    pub fn stop(&mut self) {
        if let Some(stop) = self.active.take() {
            stop.store(true, Ordering::SeqCst);
            tracing::debug!("playback stopped");
        }
    }

    /// Whether an item is currently active
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

/// Synthesize, decode, and play one item to the end (or until stopped)
async fn run_item(
    synthesizer: &dyn Synthesizer,
    text: &str,
    stop: &Arc<AtomicBool>,
) -> PlaybackOutcome {
    let audio = match synthesizer.synthesize(text).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis failed");
            return PlaybackOutcome::Failed;
        }
    };

    if stop.load(Ordering::SeqCst) {
        return PlaybackOutcome::Failed;
    }

    let stop_playback = Arc::clone(stop);
    let played = tokio::task::spawn_blocking(move || play_audio(&audio, &stop_playback)).await;

    match played {
        Ok(Ok(())) => PlaybackOutcome::Finished,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "audio playback failed");
            PlaybackOutcome::Failed
        }
        Err(e) => {
            tracing::warn!(error = %e, "playback task failed");
            PlaybackOutcome::Failed
        }
    }
}

/// Decode and play an audio payload on the default output device
///
/// Blocks until the audio finishes or the stop flag is set.
fn play_audio(audio: &[u8], stop: &Arc<AtomicBool>) -> Result<()> {
    let (samples, sample_rate) = decode_audio(audio)?;
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels);

    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(AtomicBool::new(false));

    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut pos) = position_cb.lock() else { return };

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples_cb.len() {
                        let s = samples_cb[*pos];
                        *pos += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::SeqCst);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate);
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    if !stop.load(Ordering::SeqCst) {
        // Small delay to let the device drain
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Decode a synthesized payload into mono f32 samples
///
/// The synthesis endpoint returns a raw playable byte stream; WAV and MP3
/// are distinguished by their magic bytes.
fn decode_audio(audio: &[u8]) -> Result<(Vec<f32>, u32)> {
    if audio.starts_with(b"RIFF") {
        decode_wav(audio)
    } else {
        decode_mp3(audio)
    }
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };

    let mono = downmix(&samples, usize::from(spec.channels));
    Ok((mono, spec.sample_rate))
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate as u32;
                }
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("audio payload is not playable".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Average interleaved frames down to mono
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Truncate to a character count, respecting codepoint boundaries
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
