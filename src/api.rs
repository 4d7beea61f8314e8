//! HTTP status/control surface
//!
//! The surrounding UI consumes this; it owns nothing. Status is a read-only
//! projection of the controller; control requests are forwarded to the
//! daemon and acknowledged without waiting for the transition.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::controller::ConversationMode;
use crate::status::StatusSnapshot;
use crate::Result;

/// Commands the surrounding UI can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Begin a listening session in the given mode
    Start { mode: ConversationMode },
    /// Release push-to-talk (manual mode)
    Stop,
    /// Exit the conversation entirely
    Exit,
}

/// Shared state for API handlers
pub struct ApiState {
    status: watch::Receiver<StatusSnapshot>,
    control: mpsc::Sender<ControlCommand>,
}

impl ApiState {
    /// Create API state over the status channel and control queue
    #[must_use]
    pub const fn new(
        status: watch::Receiver<StatusSnapshot>,
        control: mpsc::Sender<ControlCommand>,
    ) -> Self {
        Self { status, control }
    }
}

/// Build the status/control router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/control/start", post(control_start))
        .route("/control/stop", post(control_stop))
        .route("/control/exit", post(control_exit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the process exits
///
/// # Errors
///
/// Returns error if the listener cannot bind.
pub async fn serve(port: u16, state: Arc<ApiState>) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "status API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Current controller status
async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusSnapshot> {
    Json(state.status.borrow().clone())
}

/// Start request body
#[derive(Debug, Deserialize)]
struct StartRequest {
    mode: StartMode,
}

/// Requested conversation mode
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StartMode {
    Manual,
    Autonomous,
}

impl From<StartMode> for ConversationMode {
    fn from(mode: StartMode) -> Self {
        match mode {
            StartMode::Manual => Self::Manual,
            StartMode::Autonomous => Self::Autonomous,
        }
    }
}

/// Begin listening in the requested mode
async fn control_start(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<StartRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .control
        .send(ControlCommand::Start {
            mode: request.mode.into(),
        })
        .await
        .map_err(|_| ApiError::ControllerGone)?;
    Ok(StatusCode::ACCEPTED)
}

/// Release push-to-talk
async fn control_stop(
    State(state): State<Arc<ApiState>>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .control
        .send(ControlCommand::Stop)
        .await
        .map_err(|_| ApiError::ControllerGone)?;
    Ok(StatusCode::ACCEPTED)
}

/// Exit the conversation
async fn control_exit(
    State(state): State<Arc<ApiState>>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .control
        .send(ControlCommand::Exit)
        .await
        .map_err(|_| ApiError::ControllerGone)?;
    Ok(StatusCode::ACCEPTED)
}

/// Control API errors
#[derive(Debug)]
enum ApiError {
    ControllerGone,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::ControllerGone => (
                StatusCode::SERVICE_UNAVAILABLE,
                "controller_gone",
                "the voice controller is shutting down".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
