use super::state::AppState;
use crate::buffer::BufferStats;
use crate::capture::ControllerStatus;
use crate::error::ReplayError;
use crate::export::SavedArtifact;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SetCapacityRequest {
    /// New buffer capacity in whole seconds
    pub capacity_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub capture: ControllerStatus,
    pub buffer: BufferStats,
}

#[derive(Debug, Serialize)]
pub struct CapacityResponse {
    pub capacity_secs: u64,
    pub evicted: usize,
    pub buffer: BufferStats,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
    pub buffer: BufferStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: ReplayError,
}

/// Replay errors as HTTP responses
pub struct ApiError(ReplayError);

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReplayError::EmptyBuffer => StatusCode::CONFLICT,
            ReplayError::InvalidCapacity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ReplayError::CaptureFailed { .. } | ReplayError::Source { .. } => StatusCode::BAD_GATEWAY,
            ReplayError::OutOfOrderSegment { .. } | ReplayError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                detail: self.0,
            }),
        )
            .into_response()
    }
}

async fn current_status(state: &AppState) -> StatusResponse {
    let capture = state.controller.lock().await.report().await;
    let buffer = state.store.read().await.stats();
    StatusResponse { capture, buffer }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /replay/status
/// Capture state and buffer statistics
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(current_status(&state).await)
}

/// POST /replay/start
/// Start capturing (no-op if already capturing)
pub async fn start_capture(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.lock().await.start().await?;
    Ok(Json(current_status(&state).await))
}

/// POST /replay/stop
/// Stop capturing (no-op if idle); retained segments are kept
pub async fn stop_capture(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    state.controller.lock().await.stop().await?;
    Ok(Json(current_status(&state).await))
}

/// PUT /replay/capacity
/// Change the buffer capacity, trimming immediately if it shrank
pub async fn set_capacity(
    State(state): State<AppState>,
    Json(req): Json<SetCapacityRequest>,
) -> Result<Json<CapacityResponse>, ApiError> {
    let mut store = state.store.write().await;
    let evicted = store.set_capacity(req.capacity_secs)?;

    Ok(Json(CapacityResponse {
        capacity_secs: store.capacity_secs(),
        evicted,
        buffer: store.stats(),
    }))
}

/// POST /replay/save
/// Download the current buffer as one artifact
pub async fn save_replay(State(state): State<AppState>) -> Result<Response, ApiError> {
    let snapshot = state.store.read().await.snapshot();
    let artifact = state.exporter.export(&snapshot)?;

    info!("Serving replay download: {}", artifact.filename);

    let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

/// POST /replay/save/disk
/// Write the current buffer to the configured output directory
pub async fn save_replay_to_disk(
    State(state): State<AppState>,
) -> Result<Json<SavedArtifact>, ApiError> {
    let snapshot = state.store.read().await.snapshot();
    let artifact = state.exporter.export(&snapshot)?;
    let saved = state.sink.deliver(&artifact).await?;

    info!("Replay saved via {}: {}", state.sink.name(), saved.location);
    Ok(Json(saved))
}

/// POST /replay/clear
/// Drop every retained segment
pub async fn clear_buffer(State(state): State<AppState>) -> Json<ClearResponse> {
    let mut store = state.store.write().await;
    let cleared = store.clear();

    Json(ClearResponse {
        cleared,
        buffer: store.stats(),
    })
}

/// GET /replay/events
/// Server-sent stream of capture notifications
pub async fn replay_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let notices = state.notices.subscribe();

    let events = stream::unfold(notices, |mut notices| async move {
        loop {
            match notices.recv().await {
                Ok(notice) => return Some((Event::default().json_data(&notice), notices)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event stream subscriber lagged, {} notices skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
