//! Interactive first-run setup wizard (`cadence setup`)

use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};

use crate::config::{
    self, CadenceConfigFile, ControllerFileConfig, ConversationFileConfig, RecognizerFileConfig,
    ServerFileConfig, SynthesisFileConfig,
};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or the config cannot be written.
pub fn run_setup() -> anyhow::Result<()> {
    println!("Cadence Setup\n");

    let existing = config::load_config_file();
    let config_path = config::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/omni/cadence/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Recognizer API key
    let existing_key = existing.recognizer.api_key.as_deref();
    let masked = existing_key.map(|k| {
        if k.len() > 8 {
            format!("{}...{}", &k[..4], &k[k.len() - 4..])
        } else {
            "****".to_string()
        }
    });

    let prompt = masked.as_ref().map_or_else(
        || "Recognizer API key (DEEPGRAM_API_KEY)".to_string(),
        |m| format!("Recognizer API key (current: {m}, leave blank to keep)"),
    );

    let api_key_input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    let api_key = if api_key_input.is_empty() {
        existing_key.map(str::to_string)
    } else {
        Some(api_key_input)
    };

    // 2. Recognition model
    let models = ["nova-2", "nova-3", "base"];
    let default_model = existing
        .recognizer
        .model
        .as_deref()
        .and_then(|m| models.iter().position(|&l| l == m))
        .unwrap_or(0);

    let model_idx = Select::new()
        .with_prompt("Select a recognition model")
        .items(&models)
        .default(default_model)
        .interact()?;
    let model = models[model_idx].to_string();

    // 3. Conversation backend
    let conversation_url: String = Input::new()
        .with_prompt("Conversation endpoint URL")
        .default(
            existing
                .conversation
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:8787/v1/converse".to_string()),
        )
        .interact_text()?;

    // 4. Synthesis endpoint and voice
    let synthesis_url: String = Input::new()
        .with_prompt("Synthesis endpoint URL")
        .default(
            existing
                .synthesis
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:8787/v1/speak".to_string()),
        )
        .interact_text()?;

    let voices = ["alloy", "echo", "nova", "shimmer"];
    let default_voice = existing
        .synthesis
        .voice
        .as_deref()
        .and_then(|v| voices.iter().position(|&l| l == v))
        .unwrap_or(0);

    let voice_idx = Select::new()
        .with_prompt("Select a voice")
        .items(&voices)
        .default(default_voice)
        .interact()?;
    let voice = voices[voice_idx].to_string();

    let file = CadenceConfigFile {
        recognizer: RecognizerFileConfig {
            url: existing.recognizer.url,
            api_key,
            model: Some(model),
            language: existing.recognizer.language,
            interim_results: existing.recognizer.interim_results,
            endpointing_ms: existing.recognizer.endpointing_ms,
            utterance_end_ms: existing.recognizer.utterance_end_ms,
        },
        conversation: ConversationFileConfig {
            url: Some(conversation_url),
            api_key: existing.conversation.api_key,
            history_turns: existing.conversation.history_turns,
        },
        synthesis: SynthesisFileConfig {
            url: Some(synthesis_url),
            api_key: existing.synthesis.api_key,
            voice: Some(voice),
        },
        controller: ControllerFileConfig {
            resume_backoff_ms: existing.controller.resume_backoff_ms,
        },
        server: ServerFileConfig {
            port: existing.server.port,
        },
    };

    println!("\nWriting config to {}", config_path.display());
    let confirmed = Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?;

    if !confirmed {
        println!("Setup cancelled; nothing written.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, toml::to_string_pretty(&file)?)?;

    println!("Done. Run `cadence` to start the voice controller.");
    Ok(())
}
