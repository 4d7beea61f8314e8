//! Speech synthesis client
//!
//! Single request/response: capped text in, raw playable audio bytes out.
//! The trait seam lets the playback path run against a mock in tests.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Synthesizes speech from text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Request synthesized audio for the given text
    ///
    /// # Errors
    ///
    /// Returns error if the synthesis request fails.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// HTTP speech-synthesis endpoint client
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    voice: String,
}

impl HttpSynthesizer {
    /// Create a synthesizer against the given endpoint
    #[must_use]
    pub fn new(url: String, api_key: Option<SecretString>, voice: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            voice,
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SynthesisRequest<'a> {
            text: &'a str,
            voice: &'a str,
        }

        let request = SynthesisRequest {
            text,
            voice: &self.voice,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "synthesis endpoint error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "synthesized audio received");
        Ok(audio.to_vec())
    }
}
