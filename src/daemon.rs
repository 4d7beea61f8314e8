//! Daemon - the conversation driver
//!
//! Owns the real resources (microphone, transcription link, response stream,
//! playback) and runs the single event loop that feeds the controller and
//! interprets its effects. cpal streams are not `Send`, so the capture
//! session lives here on the driver thread; tasks only touch buffers and
//! channel handles. Mutual exclusion across resource categories is the
//! controller's state discipline; applying effects in order enforces
//! close-before-open.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::{self, ApiState, ControlCommand};
use crate::config::Config;
use crate::controller::{Controller, ControllerEvent, ConversationMode, Effect};
use crate::response::{DispatchOutcome, HistoryTurn, ResponseStreamer};
use crate::voice::capture::CaptureSession;
use crate::voice::link::{LinkEvent, TranscriptionLink};
use crate::voice::playback::{PlaybackOutcome, PlaybackSession};
use crate::voice::synth::HttpSynthesizer;
use crate::{Error, Result};

/// Capacity for the daemon's event channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The Cadence daemon - drives one voice conversation
pub struct Daemon {
    config: Config,
    autostart: Option<ConversationMode>,
}

/// Event channels shared with the resource tasks
struct Channels {
    link_tx: mpsc::Sender<LinkEvent>,
    playback_tx: mpsc::Sender<PlaybackOutcome>,
    dispatch_tx: mpsc::Sender<DispatchOutcome>,
    chunk_tx: mpsc::Sender<String>,
    resume_tx: mpsc::Sender<u64>,
}

/// The open resources, at most one category at a time
struct Resources {
    capture: Option<CaptureSession>,
    link: Option<TranscriptionLink>,
    pump: Option<tokio::task::JoinHandle<()>>,
    dispatch: Option<tokio::task::JoinHandle<()>>,
    playback: PlaybackSession,
    pending_dispatch: Option<String>,
    history: Vec<HistoryTurn>,
}

impl Daemon {
    /// Create a daemon over the given configuration
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            autostart: None,
        }
    }

    /// Enter the given mode immediately on startup
    #[must_use]
    pub const fn with_autostart(mut self, mode: ConversationMode) -> Self {
        self.autostart = Some(mode);
        self
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if startup fails; conversation-level failures are
    /// absorbed into state transitions and never end the loop.
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        let (mut controller, status_rx) = Controller::new();

        let (control_tx, mut control_rx) = mpsc::channel::<ControlCommand>(16);
        let (link_tx, mut link_rx) = mpsc::channel::<LinkEvent>(EVENT_CHANNEL_CAPACITY);
        let (playback_tx, mut playback_rx) = mpsc::channel::<PlaybackOutcome>(4);
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<DispatchOutcome>(4);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(EVENT_CHANNEL_CAPACITY);
        let (resume_tx, mut resume_rx) = mpsc::channel::<u64>(4);

        let channels = Channels {
            link_tx,
            playback_tx,
            dispatch_tx,
            chunk_tx,
            resume_tx,
        };

        // Status/control API for the surrounding UI
        let api_state = Arc::new(ApiState::new(status_rx, control_tx.clone()));
        let api_port = self.config.api_port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(api_port, api_state).await {
                tracing::error!(error = %e, "status API failed");
            }
        });

        // Ctrl-c tears the conversation down
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        let streamer = Arc::new(ResponseStreamer::new(
            self.config.conversation.url.clone(),
            self.config.conversation.api_key.clone(),
        ));
        let synthesizer = Arc::new(HttpSynthesizer::new(
            self.config.synthesis.url.clone(),
            self.config.synthesis.api_key.clone(),
            self.config.synthesis.voice.clone(),
        ));

        let mut resources = Resources {
            capture: None,
            link: None,
            pump: None,
            dispatch: None,
            playback: PlaybackSession::new(synthesizer),
            pending_dispatch: None,
            history: Vec::new(),
        };

        tracing::info!("voice controller running");

        if let Some(mode) = self.autostart {
            let effects = controller.handle(ControllerEvent::StartListening { mode });
            self.apply(&mut controller, &mut resources, &channels, &streamer, effects)
                .await;
        }

        loop {
            let event = tokio::select! {
                Some(command) = control_rx.recv() => match command {
                    ControlCommand::Start { mode } => ControllerEvent::StartListening { mode },
                    ControlCommand::Stop => ControllerEvent::StopListening,
                    ControlCommand::Exit => ControllerEvent::Exit,
                },
                Some(link_event) = link_rx.recv() => ControllerEvent::Transcript {
                    session: link_event.session,
                    event: link_event.event,
                },
                Some(outcome) = dispatch_rx.recv() => {
                    self.record_exchange(&mut resources, &outcome);
                    match outcome.error {
                        Some(reason) => ControllerEvent::DispatchFailed {
                            partial: outcome.text,
                            reason,
                        },
                        None => ControllerEvent::DispatchComplete { reply: outcome.text },
                    }
                },
                Some(chunk) = chunk_rx.recv() => ControllerEvent::DispatchChunk(chunk),
                Some(_) = playback_rx.recv() => ControllerEvent::PlaybackDone,
                Some(generation) = resume_rx.recv() => ControllerEvent::ResumeFired { generation },
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutting down");
                    let effects = controller.handle(ControllerEvent::Exit);
                    self.apply(&mut controller, &mut resources, &channels, &streamer, effects)
                        .await;
                    break;
                }
            };

            let effects = controller.handle(event);
            self.apply(&mut controller, &mut resources, &channels, &streamer, effects)
                .await;
        }

        tracing::info!("daemon stopped");
        Ok(())
    }

    /// Apply controller effects, in order
    async fn apply(
        &self,
        controller: &mut Controller,
        resources: &mut Resources,
        channels: &Channels,
        streamer: &Arc<ResponseStreamer>,
        effects: Vec<Effect>,
    ) {
        for effect in effects {
            match effect {
                Effect::OpenCapture => {
                    self.open_capture(controller, resources, channels).await;
                }
                Effect::CloseCapture => close_capture(resources),
                Effect::Dispatch { text } => {
                    open_dispatch(streamer, resources, channels, text);
                }
                Effect::CancelDispatch => cancel_dispatch(resources),
                Effect::Speak { text } => {
                    resources.playback.speak(&text, channels.playback_tx.clone());
                }
                Effect::StopPlayback => resources.playback.stop(),
                Effect::ScheduleResume { generation } => {
                    self.schedule_resume(channels, generation);
                }
                Effect::SurfaceError { message } => {
                    tracing::error!(message = %message, "voice session error");
                }
            }
        }
    }

    /// Acquire the microphone and open a transcription link
    async fn open_capture(
        &self,
        controller: &mut Controller,
        resources: &mut Resources,
        channels: &Channels,
    ) {
        // Close-before-open: any lingering session of this category goes
        // first; both teardowns are idempotent.
        close_capture(resources);

        let mut capture = match CaptureSession::acquire() {
            Ok(capture) => capture,
            Err(e) => {
                report_capture_failure(controller, &e);
                return;
            }
        };

        let mut chunks = match capture.start() {
            Ok(chunks) => chunks,
            Err(e) => {
                capture.release();
                report_capture_failure(controller, &e);
                return;
            }
        };

        let link_config = self.config.recognizer.link_config();
        let link = match TranscriptionLink::open(&link_config, channels.link_tx.clone()).await {
            Ok(link) => link,
            Err(e) => {
                capture.release();
                report_capture_failure(controller, &e);
                return;
            }
        };

        controller.attach_session(link.session());

        // Pump encoded chunks into the link; unready chunks are dropped by
        // the link itself.
        let audio_tx = link.audio_sender();
        resources.pump = Some(tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                if audio_tx.try_send(chunk).is_err() && audio_tx.is_closed() {
                    break;
                }
            }
        }));

        resources.capture = Some(capture);
        resources.link = Some(link);
    }

    /// Fire a resume wakeup after the configured backoff
    fn schedule_resume(&self, channels: &Channels, generation: u64) {
        let backoff = self.config.controller.resume_backoff;
        let resume_tx = channels.resume_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = resume_tx.send(generation).await;
        });
    }

    /// Record a completed exchange in the bounded history window
    fn record_exchange(&self, resources: &mut Resources, outcome: &DispatchOutcome) {
        resources.dispatch = None;

        let Some(user) = resources.pending_dispatch.take() else {
            return;
        };

        // Failed dispatches keep their partial text out of the context
        // window; only completed exchanges inform later turns.
        if outcome.error.is_some() || outcome.text.trim().is_empty() {
            return;
        }

        resources.history.push(HistoryTurn {
            user,
            assistant: outcome.text.clone(),
        });

        let max_turns = self.config.conversation.history_turns;
        if resources.history.len() > max_turns {
            let excess = resources.history.len() - max_turns;
            resources.history.drain(..excess);
        }
    }
}

/// Close the transcription link and release the microphone
fn close_capture(resources: &mut Resources) {
    if let Some(mut link) = resources.link.take() {
        link.close();
    }
    if let Some(mut capture) = resources.capture.take() {
        capture.release();
    }
    if let Some(pump) = resources.pump.take() {
        pump.abort();
    }
}

/// Open a response stream for the dispatched text
fn open_dispatch(
    streamer: &Arc<ResponseStreamer>,
    resources: &mut Resources,
    channels: &Channels,
    text: String,
) {
    cancel_dispatch(resources);

    resources.pending_dispatch = Some(text.clone());
    let streamer = Arc::clone(streamer);
    let history = resources.history.clone();
    let dispatch_tx = channels.dispatch_tx.clone();
    let chunk_tx = channels.chunk_tx.clone();

    resources.dispatch = Some(tokio::spawn(async move {
        let outcome = streamer.dispatch(&text, &history, None, chunk_tx).await;
        let _ = dispatch_tx.send(outcome).await;
    }));
}

/// Abort an in-flight response stream
fn cancel_dispatch(resources: &mut Resources) {
    if let Some(dispatch) = resources.dispatch.take() {
        dispatch.abort();
    }
    resources.pending_dispatch = None;
}

/// Feed an acquisition failure back through the controller
///
/// Acquisition failures only ever surface; they never touch resources, so
/// the resulting effects are handled inline.
fn report_capture_failure(controller: &mut Controller, error: &Error) {
    let effects = controller.handle(ControllerEvent::CaptureFailed {
        error: error.to_string(),
    });
    for effect in effects {
        if let Effect::SurfaceError { message } = effect {
            tracing::error!(message = %message, "voice session error");
        }
    }
}
