//! Streaming transcription link
//!
//! A persistent duplex WebSocket to the external recognizer: encoded audio
//! frames go upstream, transcript events come downstream in order. The link
//! performs no retries itself; all backoff policy belongs to the controller.
//! Every event is tagged with the link's session id so the controller can
//! discard trailing events after it has logically left the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{connect_async, tungstenite};
use url::Url;
use uuid::Uuid;

use crate::{Error, Result};

/// Bounded capacity for outbound audio; full means the chunk is dropped
const AUDIO_CHANNEL_CAPACITY: usize = 32;

/// Connection parameters for the streaming recognizer
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket endpoint (e.g. `wss://api.deepgram.com/v1/listen`)
    pub url: String,

    /// API key sent as an `Authorization: Token` header
    pub api_key: Option<SecretString>,

    /// Recognition model identifier
    pub model: String,

    /// Spoken language tag (e.g. "en-US")
    pub language: String,

    /// Request interim (non-final) transcript results
    pub interim_results: bool,

    /// Silence endpoint timeout in milliseconds
    pub endpointing_ms: u32,

    /// Utterance-end timeout in milliseconds
    pub utterance_end_ms: u32,

    /// Sample rate of the linear16 audio frames
    pub sample_rate: u32,
}

/// A transcript event from one link instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Interim hypothesis; replaces any previous interim text
    Interim(String),
    /// Finalized fragment; appends to the pending utterance
    Final(String),
    /// The speaker paused long enough for the utterance to be complete
    UtteranceBoundary,
    /// The link failed; recovery policy is the controller's call
    TransportError(String),
}

/// A transcript event tagged with its originating link session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub session: Uuid,
    pub event: TranscriptEvent,
}

/// Duplex stream to the external recognizer
pub struct TranscriptionLink {
    session: Uuid,
    audio_tx: mpsc::Sender<Vec<u8>>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl TranscriptionLink {
    /// Establish the duplex stream
    ///
    /// Events are delivered, in order, on `events` until the link closes.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the handshake fails, `Config` if the endpoint
    /// URL is invalid.
    pub async fn open(config: &LinkConfig, events: mpsc::Sender<LinkEvent>) -> Result<Self> {
        let session = Uuid::new_v4();
        let url = build_url(config)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(e.to_string()))?;
        if let Some(key) = &config.api_key {
            let value = format!("Token {}", key.expose_secret())
                .parse()
                .map_err(|_| Error::Config("recognizer API key is not a valid header".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        tracing::debug!(%session, model = %config.model, "transcription link connected");

        let (mut sink, mut stream) = ws.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_CHANNEL_CAPACITY);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let closing = Arc::new(AtomicBool::new(false));

        // Writer: audio frames upstream until closed, then a graceful
        // finalize control message.
        let closing_writer = Arc::clone(&closing);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = audio_rx.recv() => {
                        let Some(data) = chunk else { break };
                        if sink.send(tungstenite::Message::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut close_rx => {
                        closing_writer.store(true, Ordering::SeqCst);
                        let finalize = serde_json::json!({"type": "CloseStream"}).to_string();
                        let _ = sink.send(tungstenite::Message::Text(finalize.into())).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        // Reader: parse server events; a drop that we did not initiate is a
        // transport error.
        let closing_reader = Arc::clone(&closing);
        tokio::spawn(async move {
            let mut failure: Option<String> = None;

            while let Some(message) = stream.next().await {
                match message {
                    Ok(tungstenite::Message::Text(text)) => {
                        if let Some(event) = parse_event(&text) {
                            if events.send(LinkEvent { session, event }).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(tungstenite::Message::Close(frame)) => {
                        failure = Some(frame.map_or_else(
                            || "recognizer closed the stream".to_string(),
                            |f| format!("recognizer closed the stream: {} {}", f.code, f.reason),
                        ));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }

            if !closing_reader.load(Ordering::SeqCst) {
                let reason =
                    failure.unwrap_or_else(|| "recognizer stream ended unexpectedly".to_string());
                tracing::warn!(%session, reason = %reason, "transcription link lost");
                let _ = events
                    .send(LinkEvent {
                        session,
                        event: TranscriptEvent::TransportError(reason),
                    })
                    .await;
            }
            tracing::debug!(%session, "transcription link reader finished");
        });

        Ok(Self {
            session,
            audio_tx,
            close_tx: Some(close_tx),
        })
    }

    /// This link instance's session tag
    #[must_use]
    pub const fn session(&self) -> Uuid {
        self.session
    }

    /// A cloneable handle for feeding audio from the capture pump
    #[must_use]
    pub fn audio_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.audio_tx.clone()
    }

    /// Send one encoded audio chunk
    ///
    /// Safe no-op when the link is not ready to take it: chunks are dropped,
    /// not queued (liveness over losslessness).
    pub fn send(&self, chunk: Vec<u8>) {
        let _ = self.audio_tx.try_send(chunk);
    }

    /// Close the link, requesting a graceful finalize if still open
    ///
    /// Idempotent; teardown finishes in the background.
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            tracing::debug!(session = %self.session, "closing transcription link");
            let _ = tx.send(());
        }
    }
}

impl Drop for TranscriptionLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the recognizer URL with stream parameters as query pairs
fn build_url(config: &LinkConfig) -> Result<Url> {
    let mut url = Url::parse(&config.url)
        .map_err(|e| Error::Config(format!("invalid recognizer URL {}: {e}", config.url)))?;

    url.query_pairs_mut()
        .append_pair("model", &config.model)
        .append_pair("language", &config.language)
        .append_pair("encoding", "linear16")
        .append_pair("sample_rate", &config.sample_rate.to_string())
        .append_pair("punctuate", "true")
        .append_pair("interim_results", bool_param(config.interim_results))
        .append_pair("endpointing", &config.endpointing_ms.to_string())
        .append_pair("utterance_end_ms", &config.utterance_end_ms.to_string());

    Ok(url)
}

const fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Response event from the recognizer
#[derive(Deserialize)]
struct ResultsPayload {
    #[serde(default)]
    is_final: bool,
    channel: ChannelPayload,
}

#[derive(Deserialize)]
struct ChannelPayload {
    alternatives: Vec<AlternativePayload>,
}

#[derive(Deserialize)]
struct AlternativePayload {
    transcript: String,
}

/// Parse one recognizer message into a transcript event
///
/// Unknown message types and empty transcripts are ignored.
fn parse_event(text: &str) -> Option<TranscriptEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    match value.get("type").and_then(serde_json::Value::as_str) {
        Some("Results") => {
            let payload: ResultsPayload = serde_json::from_value(value).ok()?;
            let transcript = payload
                .channel
                .alternatives
                .first()
                .map(|a| a.transcript.clone())
                .unwrap_or_default();

            if transcript.trim().is_empty() {
                None
            } else if payload.is_final {
                Some(TranscriptEvent::Final(transcript))
            } else {
                Some(TranscriptEvent::Interim(transcript))
            }
        }
        Some("UtteranceEnd") => Some(TranscriptEvent::UtteranceBoundary),
        _ => None,
    }
}
