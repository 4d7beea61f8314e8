//! Response streaming from the conversation backend
//!
//! Opens one chunked text stream per dispatched utterance, forwards each
//! chunk for live display, and accumulates the full reply. Partial text is
//! never discarded: a failed stream still delivers whatever arrived.

use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Reply text accumulated from the chunk stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseAccumulator {
    text: String,
    complete: bool,
}

impl ResponseAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk
    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    /// Mark the stream complete
    ///
    /// Called on both normal completion and error; partial text stays.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    /// The accumulated reply text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the stream has terminated
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Consume the accumulator, returning the reply text
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

/// One prior exchange sent as dispatch context
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryTurn {
    /// What the user said
    pub user: String,
    /// What the assistant replied
    pub assistant: String,
}

/// Terminal result of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The reply text, possibly partial
    pub text: String,
    /// The failure reason, if the stream did not complete normally
    pub error: Option<String>,
}

/// Streams replies from the conversation backend
pub struct ResponseStreamer {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl ResponseStreamer {
    /// Create a streamer against the given endpoint
    #[must_use]
    pub fn new(url: String, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }

    /// Dispatch an utterance and stream the reply
    ///
    /// Each chunk is forwarded on `live` as it arrives. The returned outcome
    /// always carries whatever text accumulated, even on failure.
    pub async fn dispatch(
        &self,
        text: &str,
        history: &[HistoryTurn],
        image: Option<&str>,
        live: mpsc::Sender<String>,
    ) -> DispatchOutcome {
        tracing::info!(text = %text, history_turns = history.len(), "dispatching utterance");

        let response = match self.open_stream(text, history, image).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "dispatch failed to open");
                return DispatchOutcome {
                    text: String::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut accumulator = ResponseAccumulator::new();
        let error = consume(response.bytes_stream(), &mut accumulator, &live).await;

        if let Some(ref reason) = error {
            tracing::warn!(
                reason = %reason,
                partial_len = accumulator.text().len(),
                "response stream failed, partial text preserved"
            );
        } else {
            tracing::debug!(reply_len = accumulator.text().len(), "response stream complete");
        }

        DispatchOutcome {
            text: accumulator.into_text(),
            error,
        }
    }

    /// Open the chunked response stream
    async fn open_stream(
        &self,
        text: &str,
        history: &[HistoryTurn],
        image: Option<&str>,
    ) -> Result<reqwest::Response> {
        #[derive(Serialize)]
        struct DispatchRequest<'a> {
            text: &'a str,
            #[serde(skip_serializing_if = "<[_]>::is_empty")]
            history: &'a [HistoryTurn],
            #[serde(skip_serializing_if = "Option::is_none")]
            image: Option<&'a str>,
        }

        let request = DispatchRequest {
            text,
            history,
            image,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Dispatch(format!(
                "conversation endpoint error {status}: {body}"
            )));
        }

        Ok(response)
    }
}

/// Drain a chunk stream into the accumulator, forwarding chunks for display
///
/// Returns the failure reason if the stream errored; in either case the
/// accumulator is marked complete exactly once.
pub async fn consume<S, B, E>(
    stream: S,
    accumulator: &mut ResponseAccumulator,
    live: &mpsc::Sender<String>,
) -> Option<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures::pin_mut!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(bytes) => {
                let chunk = String::from_utf8_lossy(bytes.as_ref()).into_owned();
                if chunk.is_empty() {
                    continue;
                }
                accumulator.push(&chunk);
                let _ = live.send(chunk).await;
            }
            Err(e) => {
                accumulator.finish();
                return Some(e.to_string());
            }
        }
    }

    accumulator.finish();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_accumulate_in_order() {
        let chunks: Vec<std::result::Result<&str, String>> = vec![Ok("He"), Ok("llo!")];
        let (live_tx, mut live_rx) = mpsc::channel(8);

        let mut accumulator = ResponseAccumulator::new();
        let error = consume(tokio_stream::iter(chunks), &mut accumulator, &live_tx).await;

        assert_eq!(error, None);
        assert_eq!(accumulator.text(), "Hello!");
        assert!(accumulator.is_complete());

        assert_eq!(live_rx.recv().await.as_deref(), Some("He"));
        assert_eq!(live_rx.recv().await.as_deref(), Some("llo!"));
    }

    #[tokio::test]
    async fn test_partial_text_survives_stream_error() {
        let chunks: Vec<std::result::Result<&str, String>> = vec![
            Ok("The answer is"),
            Err("connection reset".to_string()),
            Ok(" 42"),
        ];
        let (live_tx, _live_rx) = mpsc::channel(8);

        let mut accumulator = ResponseAccumulator::new();
        let error = consume(tokio_stream::iter(chunks), &mut accumulator, &live_tx).await;

        assert_eq!(error.as_deref(), Some("connection reset"));
        assert_eq!(accumulator.text(), "The answer is");
        assert!(accumulator.is_complete());
    }

    #[tokio::test]
    async fn test_empty_stream_completes_empty() {
        let chunks: Vec<std::result::Result<&str, String>> = Vec::new();
        let (live_tx, _live_rx) = mpsc::channel(1);

        let mut accumulator = ResponseAccumulator::new();
        let error = consume(tokio_stream::iter(chunks), &mut accumulator, &live_tx).await;

        assert_eq!(error, None);
        assert_eq!(accumulator.text(), "");
        assert!(accumulator.is_complete());
    }
}
