//! Cadence - real-time voice conversation controller for AI assistants
//!
//! This library coordinates the independent asynchronous resources of a
//! spoken conversation under one state machine:
//! - microphone capture and encoding
//! - a streaming speech-recognition link
//! - utterance-boundary detection and dispatch gating
//! - chunked response streaming from the conversation backend
//! - synthesized playback and autonomous re-listening
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Surrounding UI                       │
//! │        GET /status   │   POST /control/*              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼────────────────────────────────┐
//! │                 Cadence Daemon                        │
//! │   Mode Controller │ Capture │ Link │ Playback         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼────────────────────────────────┐
//! │              External services                        │
//! │   Recognizer (WS) │ Conversation │ Synthesis          │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! At most one of {capture+link, response stream, playback} is open at any
//! instant; the controller's single tagged-union state enforces it.

pub mod api;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod response;
pub mod setup;
pub mod status;
pub mod utterance;
pub mod voice;

pub use config::Config;
pub use controller::{Controller, ControllerEvent, ControllerState, ConversationMode, Effect};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use response::{DispatchOutcome, HistoryTurn, ResponseAccumulator, ResponseStreamer};
pub use status::StatusSnapshot;
pub use utterance::{DispatchDecision, PendingUtterance, EXIT_PHRASES};
