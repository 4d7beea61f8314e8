//! Mode controller - the conversation state machine
//!
//! One tagged-union state drives everything: which resource category may be
//! open, whether a boundary dispatches, and what happens when playback or a
//! dispatch finishes. The transition logic is a deterministic
//! `(state, event) -> effects` step with no IO; the daemon interprets the
//! returned effects against real devices and network streams.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::status::{self, StatusSnapshot};
use crate::utterance::{self, PendingUtterance};
use crate::voice::link::TranscriptEvent;

/// Delay before an autonomous session resumes listening after a transport
/// failure.
pub const RESUME_BACKOFF_MS: u64 = 1500;

/// Conversation mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Push-to-talk: explicit start/stop, no auto-dispatch, no auto-resume
    Manual,
    /// Hands-free: boundaries auto-dispatch, completions auto-resume
    Autonomous,
}

/// Controller state - the single authoritative value
///
/// Capture is open iff `Listening`, the response stream is open iff
/// `Processing`, playback is open iff `Speaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

/// Events fed into the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// User started a session (manual push-to-talk or autonomous entry)
    StartListening { mode: ConversationMode },
    /// User released push-to-talk (manual mode only)
    StopListening,
    /// Explicit exit: tear everything down, clear the mode
    Exit,
    /// Event from a transcription link instance
    Transcript { session: Uuid, event: TranscriptEvent },
    /// A streamed reply chunk arrived (live display only)
    DispatchChunk(String),
    /// The response stream completed
    DispatchComplete { reply: String },
    /// The response stream failed; partial text is preserved
    DispatchFailed { partial: String, reason: String },
    /// Playback finished or failed - both mean "conversation may proceed"
    PlaybackDone,
    /// Capture could not be opened (permission/device failure)
    CaptureFailed { error: String },
    /// The scheduled resume wakeup fired
    ResumeFired { generation: u64 },
}

/// Side effects for the daemon to interpret, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Acquire the microphone and open a transcription link
    OpenCapture,
    /// Close the transcription link and release the microphone
    CloseCapture,
    /// Open a response stream for the given text
    Dispatch { text: String },
    /// Abort an in-flight response stream
    CancelDispatch,
    /// Synthesize and play the given text
    Speak { text: String },
    /// Stop any active playback
    StopPlayback,
    /// Fire a resume wakeup after the fixed backoff
    ScheduleResume { generation: u64 },
    /// Report an error that requires user attention
    SurfaceError { message: String },
}

/// The conversation controller
///
/// Owns the state, mode, pending utterance, and resume latch; publishes a
/// read-only status projection on every transition.
pub struct Controller {
    state: ControllerState,
    mode: ConversationMode,
    utterance: PendingUtterance,
    reply: String,
    link_session: Option<Uuid>,
    resume_pending: bool,
    resume_generation: u64,
    last_error: Option<String>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl Controller {
    /// Create a controller and the status channel it publishes on
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<StatusSnapshot>) {
        let (status_tx, status_rx) = status::channel();
        let controller = Self {
            state: ControllerState::Idle,
            mode: ConversationMode::Manual,
            utterance: PendingUtterance::new(),
            reply: String::new(),
            link_session: None,
            resume_pending: false,
            resume_generation: 0,
            last_error: None,
            status_tx,
        };
        (controller, status_rx)
    }

    /// Current controller state
    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    /// Current conversation mode
    #[must_use]
    pub const fn mode(&self) -> ConversationMode {
        self.mode
    }

    /// The pending utterance for the active listening span
    #[must_use]
    pub const fn utterance(&self) -> &PendingUtterance {
        &self.utterance
    }

    /// Bind the link session opened for the current listening span
    ///
    /// Events tagged with any other session id are discarded.
    pub fn attach_session(&mut self, session: Uuid) {
        self.link_session = Some(session);
    }

    /// Step the state machine
    ///
    /// Returns the effects the daemon must apply, in order. Events that do
    /// not apply to the current state (including events from a link session
    /// the controller has already left) produce no effects.
    pub fn handle(&mut self, event: ControllerEvent) -> Vec<Effect> {
        let effects = self.step(event);
        self.publish();
        effects
    }

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, event: ControllerEvent) -> Vec<Effect> {
        match event {
            ControllerEvent::StartListening { mode } => self.on_start(mode),
            ControllerEvent::StopListening => self.on_stop(),
            ControllerEvent::Exit => self.on_exit(),
            ControllerEvent::Transcript { session, event } => {
                if self.state != ControllerState::Listening
                    || self.link_session != Some(session)
                {
                    tracing::debug!(%session, "discarding transcript event from stale session");
                    return Vec::new();
                }
                self.on_transcript(event)
            }
            ControllerEvent::DispatchChunk(chunk) => {
                if self.state == ControllerState::Processing {
                    self.reply.push_str(&chunk);
                }
                Vec::new()
            }
            ControllerEvent::DispatchComplete { reply } => self.on_response(reply, None),
            ControllerEvent::DispatchFailed { partial, reason } => {
                self.on_response(partial, Some(reason))
            }
            ControllerEvent::PlaybackDone => self.on_playback_done(),
            ControllerEvent::CaptureFailed { error } => self.on_capture_failed(error),
            ControllerEvent::ResumeFired { generation } => self.on_resume(generation),
        }
    }

    fn on_start(&mut self, mode: ConversationMode) -> Vec<Effect> {
        if self.state != ControllerState::Idle {
            tracing::debug!(state = ?self.state, "start ignored - session already active");
            return Vec::new();
        }

        tracing::info!(?mode, "entering listening state");
        self.mode = mode;
        self.begin_listening()
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        if self.state != ControllerState::Listening || self.mode != ConversationMode::Manual {
            return Vec::new();
        }

        let text = self.utterance.finalized().to_string();
        self.leave_listening();

        if text.trim().is_empty() {
            tracing::debug!("manual stop with empty utterance");
            self.state = ControllerState::Idle;
            return vec![Effect::CloseCapture];
        }

        tracing::info!(text = %text, "manual stop - dispatching");
        self.state = ControllerState::Processing;
        vec![Effect::CloseCapture, Effect::Dispatch { text }]
    }

    fn on_exit(&mut self) -> Vec<Effect> {
        let effects = match self.state {
            ControllerState::Idle => Vec::new(),
            ControllerState::Listening => vec![Effect::CloseCapture],
            ControllerState::Processing => vec![Effect::CancelDispatch],
            ControllerState::Speaking => vec![Effect::StopPlayback],
        };

        tracing::info!(state = ?self.state, "exiting voice conversation");

        self.leave_listening();
        self.state = ControllerState::Idle;
        self.mode = ConversationMode::Manual;
        self.cancel_resume();
        self.reply.clear();

        effects
    }

    fn on_transcript(&mut self, event: TranscriptEvent) -> Vec<Effect> {
        match event {
            TranscriptEvent::Interim(text) => {
                self.utterance.set_interim(&text);
                Vec::new()
            }
            TranscriptEvent::Final(text) => {
                self.utterance.push_final(&text);
                Vec::new()
            }
            TranscriptEvent::UtteranceBoundary => self.on_boundary(),
            TranscriptEvent::TransportError(reason) => self.on_transport_error(reason),
        }
    }

    fn on_boundary(&mut self) -> Vec<Effect> {
        // Boundaries only drive dispatch hands-free; push-to-talk dispatches
        // on explicit stop.
        if self.mode != ConversationMode::Autonomous {
            return Vec::new();
        }

        let decision = utterance::decide(&self.utterance);
        if decision.is_exit_command {
            tracing::info!("exit command recognized");
            return self.on_exit();
        }

        if !decision.should_send {
            return Vec::new();
        }

        let text = self.utterance.finalized().to_string();
        tracing::info!(text = %text, "utterance boundary - dispatching");
        self.leave_listening();
        self.state = ControllerState::Processing;
        vec![Effect::CloseCapture, Effect::Dispatch { text }]
    }

    fn on_transport_error(&mut self, reason: String) -> Vec<Effect> {
        tracing::warn!(reason = %reason, "transcription transport error");
        self.last_error = Some(reason.clone());
        self.leave_listening();
        self.state = ControllerState::Idle;

        if self.mode == ConversationMode::Autonomous {
            // The latch is set only here: autonomous mode with every session
            // closed. The scheduled wakeup consumes it.
            self.resume_pending = true;
            self.resume_generation += 1;
            vec![
                Effect::CloseCapture,
                Effect::ScheduleResume {
                    generation: self.resume_generation,
                },
            ]
        } else {
            vec![Effect::CloseCapture, Effect::SurfaceError { message: reason }]
        }
    }

    fn on_response(&mut self, reply: String, failure: Option<String>) -> Vec<Effect> {
        if self.state != ControllerState::Processing {
            tracing::debug!("discarding response completion outside processing state");
            return Vec::new();
        }

        if let Some(reason) = failure {
            tracing::warn!(reason = %reason, partial_len = reply.len(), "dispatch failed");
            self.last_error = Some(reason);
        }
        self.reply = reply.clone();

        if self.mode == ConversationMode::Manual {
            self.state = ControllerState::Idle;
            return Vec::new();
        }

        if reply.trim().is_empty() {
            // Nothing to speak: resume listening immediately.
            self.state = ControllerState::Listening;
            self.utterance.clear();
            return vec![Effect::OpenCapture];
        }

        self.state = ControllerState::Speaking;
        vec![Effect::Speak { text: reply }]
    }

    fn on_playback_done(&mut self) -> Vec<Effect> {
        if self.state != ControllerState::Speaking {
            tracing::debug!("discarding playback completion outside speaking state");
            return Vec::new();
        }

        if self.mode == ConversationMode::Autonomous {
            self.state = ControllerState::Listening;
            self.utterance.clear();
            vec![Effect::OpenCapture]
        } else {
            self.state = ControllerState::Idle;
            Vec::new()
        }
    }

    fn on_capture_failed(&mut self, error: String) -> Vec<Effect> {
        tracing::error!(error = %error, "capture session failed to open");
        self.last_error = Some(error.clone());
        self.leave_listening();
        self.state = ControllerState::Idle;
        self.mode = ConversationMode::Manual;
        self.cancel_resume();
        vec![Effect::SurfaceError { message: error }]
    }

    fn on_resume(&mut self, generation: u64) -> Vec<Effect> {
        if !self.resume_pending
            || generation != self.resume_generation
            || self.state != ControllerState::Idle
            || self.mode != ConversationMode::Autonomous
        {
            tracing::debug!(generation, "discarding stale resume wakeup");
            return Vec::new();
        }

        tracing::info!("resuming listening after transport failure");
        self.resume_pending = false;
        self.begin_listening()
    }

    fn begin_listening(&mut self) -> Vec<Effect> {
        self.state = ControllerState::Listening;
        self.utterance = PendingUtterance::new();
        self.reply.clear();
        self.cancel_resume();
        vec![Effect::OpenCapture]
    }

    /// Clear per-span state when leaving `Listening` for any reason
    fn leave_listening(&mut self) {
        self.utterance.clear();
        self.link_session = None;
    }

    fn cancel_resume(&mut self) {
        self.resume_pending = false;
        self.resume_generation += 1;
    }

    fn publish(&self) {
        let snapshot = StatusSnapshot {
            state: self.state,
            mode: self.mode,
            interim: self.utterance.interim().to_string(),
            reply: self.reply.clone(),
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        };
        self.status_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(controller: &mut Controller, mode: ConversationMode) -> Vec<Effect> {
        controller.handle(ControllerEvent::StartListening { mode })
    }

    fn transcript(controller: &mut Controller, session: Uuid, event: TranscriptEvent) -> Vec<Effect> {
        controller.handle(ControllerEvent::Transcript { session, event })
    }

    #[test]
    fn test_start_opens_capture() {
        let (mut controller, _status) = Controller::new();
        let effects = start(&mut controller, ConversationMode::Autonomous);
        assert_eq!(effects, vec![Effect::OpenCapture]);
        assert_eq!(controller.state(), ControllerState::Listening);
    }

    #[test]
    fn test_start_ignored_while_active() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Manual);
        let effects = start(&mut controller, ConversationMode::Autonomous);
        assert!(effects.is_empty());
        assert_eq!(controller.mode(), ConversationMode::Manual);
    }

    #[test]
    fn test_stale_session_events_discarded() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        controller.attach_session(Uuid::new_v4());

        let stale = Uuid::new_v4();
        let effects = transcript(
            &mut controller,
            stale,
            TranscriptEvent::Final("hello".to_string()),
        );
        assert!(effects.is_empty());
        assert!(controller.utterance().is_empty());
    }

    #[test]
    fn test_boundary_without_text_keeps_listening() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        let session = Uuid::new_v4();
        controller.attach_session(session);

        let effects = transcript(&mut controller, session, TranscriptEvent::UtteranceBoundary);
        assert!(effects.is_empty());
        assert_eq!(controller.state(), ControllerState::Listening);
    }

    #[test]
    fn test_boundary_in_manual_mode_does_not_dispatch() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Manual);
        let session = Uuid::new_v4();
        controller.attach_session(session);

        transcript(
            &mut controller,
            session,
            TranscriptEvent::Final("hello there".to_string()),
        );
        let effects = transcript(&mut controller, session, TranscriptEvent::UtteranceBoundary);
        assert!(effects.is_empty());
        assert_eq!(controller.state(), ControllerState::Listening);
    }

    #[test]
    fn test_empty_reply_skips_playback() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        let session = Uuid::new_v4();
        controller.attach_session(session);
        transcript(
            &mut controller,
            session,
            TranscriptEvent::Final("anyone there".to_string()),
        );
        transcript(&mut controller, session, TranscriptEvent::UtteranceBoundary);
        assert_eq!(controller.state(), ControllerState::Processing);

        let effects = controller.handle(ControllerEvent::DispatchComplete {
            reply: "  ".to_string(),
        });
        assert_eq!(effects, vec![Effect::OpenCapture]);
        assert_eq!(controller.state(), ControllerState::Listening);
    }

    #[test]
    fn test_dispatch_failure_still_speaks_partial() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        let session = Uuid::new_v4();
        controller.attach_session(session);
        transcript(
            &mut controller,
            session,
            TranscriptEvent::Final("tell me a story".to_string()),
        );
        transcript(&mut controller, session, TranscriptEvent::UtteranceBoundary);

        let effects = controller.handle(ControllerEvent::DispatchFailed {
            partial: "Once upon".to_string(),
            reason: "connection reset".to_string(),
        });
        assert_eq!(
            effects,
            vec![Effect::Speak {
                text: "Once upon".to_string()
            }]
        );
        assert_eq!(controller.state(), ControllerState::Speaking);
    }

    #[test]
    fn test_exit_tears_down_playback() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        let session = Uuid::new_v4();
        controller.attach_session(session);
        transcript(
            &mut controller,
            session,
            TranscriptEvent::Final("hi".to_string()),
        );
        transcript(&mut controller, session, TranscriptEvent::UtteranceBoundary);
        controller.handle(ControllerEvent::DispatchComplete {
            reply: "hello!".to_string(),
        });
        assert_eq!(controller.state(), ControllerState::Speaking);

        let effects = controller.handle(ControllerEvent::Exit);
        assert_eq!(effects, vec![Effect::StopPlayback]);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.mode(), ConversationMode::Manual);
    }

    #[test]
    fn test_capture_failure_surfaces_and_clears_mode() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);

        let effects = controller.handle(ControllerEvent::CaptureFailed {
            error: "microphone permission denied".to_string(),
        });
        assert!(matches!(effects.as_slice(), [Effect::SurfaceError { .. }]));
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.mode(), ConversationMode::Manual);
    }

    #[test]
    fn test_resume_generation_guards_stale_wakeups() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        let session = Uuid::new_v4();
        controller.attach_session(session);

        let effects = transcript(
            &mut controller,
            session,
            TranscriptEvent::TransportError("socket closed".to_string()),
        );
        let generation = match effects.as_slice() {
            [Effect::CloseCapture, Effect::ScheduleResume { generation }] => *generation,
            other => panic!("unexpected effects: {other:?}"),
        };

        // A wakeup from a previous span must not restart anything.
        let stale = controller.handle(ControllerEvent::ResumeFired {
            generation: generation - 1,
        });
        assert!(stale.is_empty());

        let effects = controller.handle(ControllerEvent::ResumeFired { generation });
        assert_eq!(effects, vec![Effect::OpenCapture]);
        assert_eq!(controller.state(), ControllerState::Listening);
    }

    #[test]
    fn test_exit_cancels_pending_resume() {
        let (mut controller, _status) = Controller::new();
        start(&mut controller, ConversationMode::Autonomous);
        let session = Uuid::new_v4();
        controller.attach_session(session);

        let effects = transcript(
            &mut controller,
            session,
            TranscriptEvent::TransportError("socket closed".to_string()),
        );
        let generation = match effects.as_slice() {
            [Effect::CloseCapture, Effect::ScheduleResume { generation }] => *generation,
            other => panic!("unexpected effects: {other:?}"),
        };

        controller.handle(ControllerEvent::Exit);
        let effects = controller.handle(ControllerEvent::ResumeFired { generation });
        assert!(effects.is_empty());
        assert_eq!(controller.state(), ControllerState::Idle);
    }
}
