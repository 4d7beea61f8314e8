//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware or network access.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use cadence_voice::response::{consume, ResponseAccumulator};
use cadence_voice::utterance::{decide, PendingUtterance};
use cadence_voice::voice::link::TranscriptEvent;
use cadence_voice::voice::playback::{PlaybackOutcome, PlaybackSession};
use cadence_voice::voice::synth::Synthesizer;
use cadence_voice::{Controller, ControllerEvent, ControllerState, ConversationMode};

#[test]
fn test_exit_gate_is_exact_match() {
    let mut utterance = PendingUtterance::new();
    utterance.push_final("please stop now");
    let decision = decide(&utterance);
    assert!(!decision.is_exit_command, "substring must not trigger exit");
    assert!(decision.should_send);

    let mut utterance = PendingUtterance::new();
    utterance.push_final(" Stop ");
    let decision = decide(&utterance);
    assert!(decision.is_exit_command, "trimmed lowercase exact match triggers exit");
    assert!(!decision.should_send);
}

#[tokio::test]
async fn test_response_round_trip() {
    let chunks: Vec<Result<&str, String>> = vec![Ok("He"), Ok("llo!")];
    let (live_tx, mut live_rx) = mpsc::channel(8);

    let mut accumulator = ResponseAccumulator::new();
    assert!(!accumulator.is_complete());

    let error = consume(tokio_stream::iter(chunks), &mut accumulator, &live_tx).await;

    assert_eq!(error, None);
    assert_eq!(accumulator.text(), "Hello!");
    assert!(accumulator.is_complete());

    // Chunks were forwarded for live display in order
    assert_eq!(live_rx.recv().await.as_deref(), Some("He"));
    assert_eq!(live_rx.recv().await.as_deref(), Some("llo!"));

    // Completion is terminal: finishing again changes nothing
    accumulator.finish();
    assert!(accumulator.is_complete());
}

#[tokio::test]
async fn test_response_error_preserves_partial_text() {
    let chunks: Vec<Result<&str, String>> = vec![Ok("partial "), Err("timeout".to_string())];
    let (live_tx, _live_rx) = mpsc::channel(8);

    let mut accumulator = ResponseAccumulator::new();
    let error = consume(tokio_stream::iter(chunks), &mut accumulator, &live_tx).await;

    assert_eq!(error.as_deref(), Some("timeout"));
    assert_eq!(accumulator.text(), "partial ");
    assert!(accumulator.is_complete(), "errors still mark the stream complete");
}

struct SilentSynthesizer;

#[async_trait]
impl Synthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str) -> cadence_voice::Result<Vec<u8>> {
        Err(cadence_voice::Error::Synthesis("offline".to_string()))
    }
}

#[tokio::test]
async fn test_playback_stop_twice_is_safe() {
    let mut session = PlaybackSession::new(Arc::new(SilentSynthesizer));

    // With nothing playing
    session.stop();
    session.stop();

    // With an active item
    let (done_tx, _done_rx) = mpsc::channel(1);
    session.speak("hello", done_tx);
    session.stop();
    session.stop();
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_playback_failure_reports_failed_outcome() {
    let mut session = PlaybackSession::new(Arc::new(SilentSynthesizer));
    let (done_tx, mut done_rx) = mpsc::channel(1);

    session.speak("hello", done_tx);
    assert_eq!(done_rx.recv().await, Some(PlaybackOutcome::Failed));
}

#[test]
fn test_status_projection_tracks_transitions() {
    let (mut controller, status) = Controller::new();

    assert_eq!(status.borrow().state, ControllerState::Idle);

    controller.handle(ControllerEvent::StartListening {
        mode: ConversationMode::Autonomous,
    });
    let session = Uuid::new_v4();
    controller.attach_session(session);

    assert_eq!(status.borrow().state, ControllerState::Listening);
    assert_eq!(status.borrow().mode, ConversationMode::Autonomous);

    controller.handle(ControllerEvent::Transcript {
        session,
        event: TranscriptEvent::Interim("turn o".to_string()),
    });
    assert_eq!(status.borrow().interim, "turn o");

    controller.handle(ControllerEvent::Exit);
    assert_eq!(status.borrow().state, ControllerState::Idle);
    assert_eq!(status.borrow().mode, ConversationMode::Manual);
    assert_eq!(status.borrow().interim, "");
}

#[test]
fn test_status_carries_last_error() {
    let (mut controller, status) = Controller::new();

    controller.handle(ControllerEvent::StartListening {
        mode: ConversationMode::Manual,
    });
    let session = Uuid::new_v4();
    controller.attach_session(session);

    controller.handle(ControllerEvent::Transcript {
        session,
        event: TranscriptEvent::TransportError("socket closed".to_string()),
    });

    assert_eq!(status.borrow().last_error.as_deref(), Some("socket closed"));
}

#[test]
fn test_status_reply_accumulates_during_processing() {
    let (mut controller, status) = Controller::new();

    controller.handle(ControllerEvent::StartListening {
        mode: ConversationMode::Manual,
    });
    let session = Uuid::new_v4();
    controller.attach_session(session);
    controller.handle(ControllerEvent::Transcript {
        session,
        event: TranscriptEvent::Final("hello".to_string()),
    });
    controller.handle(ControllerEvent::StopListening);
    assert_eq!(status.borrow().state, ControllerState::Processing);

    controller.handle(ControllerEvent::DispatchChunk("He".to_string()));
    controller.handle(ControllerEvent::DispatchChunk("llo!".to_string()));
    assert_eq!(status.borrow().reply, "Hello!");
}
