//! Configuration management for the Cadence voice controller
//!
//! Defaults, overlaid by `~/.config/omni/cadence/config.toml` (all fields
//! optional), overlaid by environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::controller::RESUME_BACKOFF_MS;
use crate::voice::capture::SAMPLE_RATE;
use crate::voice::link::LinkConfig;

/// Cadence voice controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Streaming recognizer settings
    pub recognizer: RecognizerConfig,

    /// Conversation backend settings
    pub conversation: ConversationConfig,

    /// Speech synthesis settings
    pub synthesis: SynthesisConfig,

    /// Controller behavior settings
    pub controller: ControllerConfig,

    /// Port for the HTTP status/control surface
    pub api_port: u16,
}

/// Streaming recognizer settings
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// WebSocket endpoint
    pub url: String,

    /// API key (from `DEEPGRAM_API_KEY` or the config file)
    pub api_key: Option<SecretString>,

    /// Recognition model identifier
    pub model: String,

    /// Spoken language tag
    pub language: String,

    /// Request interim results for live display
    pub interim_results: bool,

    /// Silence endpoint timeout in milliseconds
    pub endpointing_ms: u32,

    /// Utterance-end timeout in milliseconds
    pub utterance_end_ms: u32,
}

impl RecognizerConfig {
    /// Connection parameters for one transcription link instance
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            language: self.language.clone(),
            interim_results: self.interim_results,
            endpointing_ms: self.endpointing_ms,
            utterance_end_ms: self.utterance_end_ms,
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Conversation backend settings
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Chunked-stream dispatch endpoint
    pub url: String,

    /// API key for the backend
    pub api_key: Option<SecretString>,

    /// How many recent exchanges to attach as context
    pub history_turns: usize,
}

/// Speech synthesis settings
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Synthesis endpoint
    pub url: String,

    /// API key for the endpoint
    pub api_key: Option<SecretString>,

    /// Voice identifier
    pub voice: String,
}

/// Controller behavior settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay before autonomous re-listen after a transport failure
    pub resume_backoff: Duration,
}

impl Config {
    /// Load configuration from defaults, the config file, and environment
    #[must_use]
    pub fn load() -> Self {
        let file = load_config_file();
        Self::resolve(&file)
    }

    /// Resolve a config file overlay against defaults and the environment
    #[must_use]
    pub fn resolve(file: &CadenceConfigFile) -> Self {
        let recognizer = RecognizerConfig {
            url: env_or("CADENCE_RECOGNIZER_URL", file.recognizer.url.clone())
                .unwrap_or_else(|| "wss://api.deepgram.com/v1/listen".to_string()),
            api_key: std::env::var("DEEPGRAM_API_KEY")
                .ok()
                .or_else(|| file.recognizer.api_key.clone())
                .map(SecretString::from),
            model: env_or("CADENCE_STT_MODEL", file.recognizer.model.clone())
                .unwrap_or_else(|| "nova-2".to_string()),
            language: env_or("CADENCE_LANGUAGE", file.recognizer.language.clone())
                .unwrap_or_else(|| "en-US".to_string()),
            interim_results: file.recognizer.interim_results.unwrap_or(true),
            endpointing_ms: file.recognizer.endpointing_ms.unwrap_or(300),
            utterance_end_ms: file.recognizer.utterance_end_ms.unwrap_or(1000),
        };

        let conversation = ConversationConfig {
            url: env_or("CADENCE_CONVERSATION_URL", file.conversation.url.clone())
                .unwrap_or_else(|| "http://localhost:8787/v1/converse".to_string()),
            api_key: std::env::var("CADENCE_CONVERSATION_KEY")
                .ok()
                .or_else(|| file.conversation.api_key.clone())
                .map(SecretString::from),
            history_turns: file.conversation.history_turns.unwrap_or(8),
        };

        let synthesis = SynthesisConfig {
            url: env_or("CADENCE_SYNTHESIS_URL", file.synthesis.url.clone())
                .unwrap_or_else(|| "http://localhost:8787/v1/speak".to_string()),
            api_key: std::env::var("CADENCE_SYNTHESIS_KEY")
                .ok()
                .or_else(|| file.synthesis.api_key.clone())
                .map(SecretString::from),
            voice: env_or("CADENCE_TTS_VOICE", file.synthesis.voice.clone())
                .unwrap_or_else(|| "alloy".to_string()),
        };

        let controller = ControllerConfig {
            resume_backoff: Duration::from_millis(
                file.controller.resume_backoff_ms.unwrap_or(RESUME_BACKOFF_MS),
            ),
        };

        let api_port = std::env::var("CADENCE_API_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(file.server.port)
            .unwrap_or(18791);

        Self {
            recognizer,
            conversation,
            synthesis,
            controller,
            api_port,
        }
    }
}

/// Environment override, falling back to the config file value
fn env_or(key: &str, file_value: Option<String>) -> Option<String> {
    std::env::var(key).ok().or(file_value)
}

/// Top-level TOML configuration file schema
///
/// All fields are optional; the file is a partial overlay on top of defaults.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CadenceConfigFile {
    /// Streaming recognizer configuration
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    /// Conversation backend configuration
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Controller behavior configuration
    #[serde(default)]
    pub controller: ControllerFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Recognizer section of the config file
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RecognizerFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub interim_results: Option<bool>,
    pub endpointing_ms: Option<u32>,
    pub utterance_end_ms: Option<u32>,
}

/// Conversation section of the config file
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConversationFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub history_turns: Option<usize>,
}

/// Synthesis section of the config file
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SynthesisFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub voice: Option<String>,
}

/// Controller section of the config file
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ControllerFileConfig {
    pub resume_backoff_ms: Option<u64>,
}

/// Server section of the config file
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerFileConfig {
    /// Status/control API port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CadenceConfigFile::default()` if the file doesn't exist or
/// can't be parsed.
#[must_use]
pub fn load_config_file() -> CadenceConfigFile {
    let Some(path) = config_file_path() else {
        return CadenceConfigFile::default();
    };

    if !path.exists() {
        return CadenceConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CadenceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CadenceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/cadence/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("cadence")
            .join("config.toml")
    })
}
