//! Audio capture from microphone
//!
//! A capture session claims exclusive ownership of the default input device
//! and emits fixed-interval encoded chunks until released. The cpal stream is
//! not `Send`, so the session lives on the driver thread; only the sample
//! buffer crosses into the flush task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Interval between encoded chunk flushes
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Bounded capacity of the chunk channel; when the consumer stalls, chunks
/// are dropped rather than queued without bound
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Sample encoders ranked by preference, best first
///
/// Native 16-bit needs no conversion and is the linear16 wire format; the
/// float and unsigned paths convert per sample. All paths are capped at
/// 16-bit x 16 kHz (256 kbit/s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Encoder {
    NativeI16,
    FromF32,
    FromU16,
}

/// Captures audio from the default input device
pub struct CaptureSession {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    encoder: Encoder,
    buffer: Arc<Mutex<Vec<i16>>>,
    stream: Option<Stream>,
    flush: Option<tokio::task::JoinHandle<()>>,
    released: bool,
}

impl CaptureSession {
    /// Claim exclusive ownership of the default audio input device
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the platform refuses microphone access,
    /// `DeviceUnavailable` if no device supports speech capture.
    pub fn acquire() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let ranges = device
            .supported_input_configs()
            .map_err(|e| classify_device_error(&e.to_string()))?;

        let (_, encoder, range) = ranges
            .filter_map(|range| rank_config(&range).map(|(encoder, rank)| (rank, encoder, range)))
            .min_by_key(|(rank, encoder, _)| (*encoder, *rank))
            .ok_or_else(|| {
                Error::DeviceUnavailable("no input config supports speech capture".to_string())
            })?;

        let config = range.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            ?encoder,
            "capture session acquired"
        );

        Ok(Self {
            device,
            config,
            encoder,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            flush: None,
            released: false,
        })
    }

    /// Start capturing and return the encoded chunk stream
    ///
    /// Chunks are flushed every [`FLUSH_INTERVAL`] as little-endian linear16
    /// bytes. The sequence is infinite until [`Self::release`]; a released
    /// session cannot be restarted.
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or the session was
    /// already started or released.
    pub fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        if self.released {
            return Err(Error::Audio(
                "capture session cannot be restarted after release".to_string(),
            ));
        }
        if self.stream.is_some() {
            return Err(Error::Audio("capture session already started".to_string()));
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

        let config = self.config.clone();
        let channels = usize::from(config.channels);
        let buffer = Arc::clone(&self.buffer);

        let err_fn = |err| {
            tracing::error!(error = %err, "audio capture error");
        };

        let stream = match self.encoder {
            Encoder::NativeI16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push_samples(&buffer, data.iter().copied(), channels);
                },
                err_fn,
                None,
            ),
            Encoder::FromF32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_samples(&buffer, data.iter().map(|&s| f32_to_i16(s)), channels);
                },
                err_fn,
                None,
            ),
            Encoder::FromU16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    push_samples(&buffer, data.iter().map(|&s| u16_to_i16(s)), channels);
                },
                err_fn,
                None,
            ),
        }
        .map_err(|e| classify_device_error(&e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let buffer = Arc::clone(&self.buffer);

        self.flush = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let samples = buffer
                    .lock()
                    .map(|mut buf| std::mem::take(&mut *buf))
                    .unwrap_or_default();
                if samples.is_empty() {
                    continue;
                }

                // Dropped when the consumer is gone or stalled: the chunk
                // sequence favors liveness over losslessness.
                if tx.try_send(encode_linear16(&samples)).is_err() && tx.is_closed() {
                    break;
                }
            }
        }));

        tracing::debug!("audio capture started");
        Ok(rx)
    }

    /// Release the microphone
    ///
    /// Safe to call from any exit path; idempotent.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture released");
        }
        if let Some(flush) = self.flush.take() {
            flush.abort();
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        self.released = true;
    }

    /// Whether the session currently owns an open stream
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Rank an input config range against the encoder preference list
///
/// Returns `None` for unusable ranges. The encoder preference decides first;
/// mono beats multi-channel at equal encoder preference.
fn rank_config(range: &SupportedStreamConfigRange) -> Option<(Encoder, u8)> {
    if range.min_sample_rate() > SampleRate(SAMPLE_RATE)
        || range.max_sample_rate() < SampleRate(SAMPLE_RATE)
    {
        return None;
    }

    let encoder = match range.sample_format() {
        SampleFormat::I16 => Encoder::NativeI16,
        SampleFormat::F32 => Encoder::FromF32,
        SampleFormat::U16 => Encoder::FromU16,
        _ => return None,
    };

    Some((encoder, u8::from(range.channels() != 1)))
}

/// Downmix interleaved frames to mono and append to the shared buffer
fn push_samples(
    buffer: &Arc<Mutex<Vec<i16>>>,
    samples: impl Iterator<Item = i16>,
    channels: usize,
) {
    if let Ok(mut buf) = buffer.lock() {
        if channels <= 1 {
            buf.extend(samples);
        } else {
            buf.extend(samples.step_by(channels));
        }
    }
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert unsigned 16-bit to signed, recentering around zero
#[allow(clippy::cast_possible_truncation)]
const fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32768) as i16
}

/// Encode samples as little-endian linear16 bytes
fn encode_linear16(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Classify a device error message into the capture error taxonomy
fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        Error::PermissionDenied(message.to_string())
    } else if lower.contains("not available") || lower.contains("no device") {
        Error::DeviceUnavailable(message.to_string())
    } else {
        Error::Audio(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SupportedBufferSize;

    fn range(channels: u16, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(8000),
            SampleRate(48000),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_encoder_preference_ranks_native_i16_first() {
        let i16_rank = rank_config(&range(1, SampleFormat::I16)).unwrap();
        let f32_rank = rank_config(&range(1, SampleFormat::F32)).unwrap();
        let u16_rank = rank_config(&range(1, SampleFormat::U16)).unwrap();

        assert!(i16_rank < f32_rank);
        assert!(f32_rank < u16_rank);
    }

    #[test]
    fn test_mono_preferred_over_stereo() {
        let mono = rank_config(&range(1, SampleFormat::F32)).unwrap();
        let stereo = rank_config(&range(2, SampleFormat::F32)).unwrap();
        assert!(mono < stereo);
    }

    #[test]
    fn test_config_without_speech_rate_rejected() {
        let high_only = SupportedStreamConfigRange::new(
            1,
            SampleRate(44100),
            SampleRate(48000),
            SupportedBufferSize::Unknown,
            SampleFormat::I16,
        );
        assert!(rank_config(&high_only).is_none());
    }

    #[test]
    fn test_linear16_encoding_is_little_endian() {
        let bytes = encode_linear16(&[1, -2]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(1.5), 32767);
        assert_eq!(f32_to_i16(-1.5), -32768);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_stereo_downmix_takes_first_channel() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        push_samples(&buffer, [10, 20, 30, 40].into_iter(), 2);
        assert_eq!(*buffer.lock().unwrap(), vec![10, 30]);
    }
}
