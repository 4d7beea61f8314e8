//! Read-only status projection for the surrounding UI
//!
//! The controller publishes a snapshot on every transition; consumers
//! (HTTP API, logs) only ever read it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::controller::{ControllerState, ConversationMode};

/// Point-in-time view of the conversation controller
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Current controller state
    pub state: ControllerState,

    /// Current conversation mode
    pub mode: ConversationMode,

    /// Live interim transcript text (display only)
    pub interim: String,

    /// Streaming reply text accumulated so far
    pub reply: String,

    /// Most recent surfaced error, if any
    pub last_error: Option<String>,

    /// When this snapshot was produced
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// The snapshot published before any event has been handled
    #[must_use]
    pub fn initial() -> Self {
        Self {
            state: ControllerState::Idle,
            mode: ConversationMode::Manual,
            interim: String::new(),
            reply: String::new(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Create the status channel seeded with the initial snapshot
#[must_use]
pub fn channel() -> (watch::Sender<StatusSnapshot>, watch::Receiver<StatusSnapshot>) {
    watch::channel(StatusSnapshot::initial())
}
