use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::source::{CaptureEvent, CaptureSource, Chunk, ContainerFormat};
use crate::buffer::{DurationEstimator, DurationMode, Segment, SharedStore, Snapshot};
use crate::error::{ReplayError, ReplayResult};

/// Capture state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Idle,
    Capturing,
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often the capture source emits a chunk
    pub chunk_interval: Duration,
    /// How chunk durations are estimated
    pub duration_mode: DurationMode,
    /// Capture bitrate used by the size-based estimate
    pub bytes_per_second: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_secs(1),
            duration_mode: DurationMode::Elapsed,
            bytes_per_second: 100_000,
        }
    }
}

/// Notification broadcast by the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureNotice {
    SessionStarted {
        session_id: Uuid,
    },
    SegmentAppended {
        sequence: u64,
        size_bytes: usize,
        duration_ms: u64,
        evicted: usize,
    },
    SegmentRejected {
        error: ReplayError,
    },
    SessionFailed {
        session_id: Uuid,
        error: ReplayError,
    },
    SessionCompleted {
        session_id: Uuid,
    },
    SessionStopped {
        session_id: Uuid,
    },
}

/// Controller status for reporting
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub status: CaptureStatus,
    pub session_id: Option<Uuid>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub sessions_started: u64,
    pub last_error: Option<String>,
    pub source: String,
    pub mime_type: String,
}

#[derive(Debug)]
struct SessionState {
    status: CaptureStatus,
    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    sessions_started: u64,
    last_error: Option<ReplayError>,
}

/// Turns chunks of one session into segments
#[derive(Debug)]
struct SessionIngest {
    estimator: DurationEstimator,
    last_timestamp_ms: Option<u64>,
}

impl SessionIngest {
    fn new(config: &ControllerConfig) -> Self {
        Self {
            estimator: DurationEstimator::new(config.duration_mode, config.bytes_per_second),
            last_timestamp_ms: None,
        }
    }

    /// Validate ordering and estimate duration. Empty chunks are skipped.
    fn admit(&mut self, chunk: Chunk) -> ReplayResult<Option<Segment>> {
        if chunk.payload.is_empty() {
            return Ok(None);
        }

        if let Some(previous_ms) = self.last_timestamp_ms {
            if chunk.timestamp_ms <= previous_ms {
                return Err(ReplayError::OutOfOrderSegment {
                    previous_ms,
                    received_ms: chunk.timestamp_ms,
                });
            }
        }

        let (duration, source) = self
            .estimator
            .estimate(chunk.payload.len(), chunk.timestamp_ms);
        self.last_timestamp_ms = Some(chunk.timestamp_ms);

        Ok(Some(Segment::new(
            chunk.payload,
            chunk.timestamp_ms,
            duration,
            source,
        )))
    }
}

/// Everything the pump task needs besides its receiver
#[derive(Clone)]
struct PumpContext {
    session_id: Uuid,
    store: SharedStore,
    state: Arc<Mutex<SessionState>>,
    notices: broadcast::Sender<CaptureNotice>,
}

impl PumpContext {
    async fn ingest(&self, ingest: &mut SessionIngest, chunk: Chunk) {
        match ingest.admit(chunk) {
            Ok(Some(segment)) => {
                let size_bytes = segment.size_bytes();
                let duration_ms = segment.estimated_duration().as_millis() as u64;
                let appended = self.store.write().await.append(segment);

                let _ = self.notices.send(CaptureNotice::SegmentAppended {
                    sequence: appended.sequence,
                    size_bytes,
                    duration_ms,
                    evicted: appended.evicted,
                });
            }
            Ok(None) => {}
            Err(err) => {
                error!("Rejected segment in session {}: {}", self.session_id, err);
                self.state.lock().await.last_error = Some(err.clone());
                let _ = self.notices.send(CaptureNotice::SegmentRejected { error: err });
            }
        }
    }

    /// Record a source failure and broadcast it. Status is left to the caller.
    async fn fail(&self, err: ReplayError) {
        error!("Capture session {} failed: {}", self.session_id, err);
        self.state.lock().await.last_error = Some(err.clone());
        let _ = self.notices.send(CaptureNotice::SessionFailed {
            session_id: self.session_id,
            error: err,
        });
    }

    async fn finish(&self, failure: Option<ReplayError>) {
        match failure {
            Some(err) => self.fail(err).await,
            None => {
                info!("Capture session {} completed", self.session_id);
                let _ = self.notices.send(CaptureNotice::SessionCompleted {
                    session_id: self.session_id,
                });
            }
        }
        self.state.lock().await.status = CaptureStatus::Idle;
    }
}

/// How a pump task ended
struct PumpExit {
    ingest: SessionIngest,
    failure: Option<ReplayError>,
}

struct Pump {
    session_id: Uuid,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<PumpExit>,
}

async fn pump(
    ctx: PumpContext,
    mut events: mpsc::Receiver<CaptureEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    mut ingest: SessionIngest,
) -> PumpExit {
    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                // No further chunks; keep the ones already delivered
                events.close();
                let mut failure = None;
                while let Some(event) = events.recv().await {
                    match event {
                        CaptureEvent::Chunk(chunk) => ctx.ingest(&mut ingest, chunk).await,
                        CaptureEvent::Failed(reason) => {
                            let err = ReplayError::capture_failed(reason);
                            ctx.fail(err.clone()).await;
                            failure = Some(err);
                        }
                    }
                }
                return PumpExit { ingest, failure };
            }

            event = events.recv() => match event {
                Some(CaptureEvent::Chunk(chunk)) => ctx.ingest(&mut ingest, chunk).await,
                Some(CaptureEvent::Failed(reason)) => {
                    let err = ReplayError::capture_failed(reason);
                    ctx.finish(Some(err.clone())).await;
                    return PumpExit { ingest, failure: Some(err) };
                }
                None => {
                    ctx.finish(None).await;
                    return PumpExit { ingest, failure: None };
                }
            },
        }
    }
}

/// Drives capture sessions and routes their chunks into the segment store
///
/// Owns the capture source for its whole lifetime: the source is acquired on
/// the first `start`, kept across stop/start cycles, and released by
/// `shutdown` or, failing that, on drop.
pub struct CaptureController {
    source: Box<dyn CaptureSource>,
    store: SharedStore,
    config: ControllerConfig,
    state: Arc<Mutex<SessionState>>,
    notices: broadcast::Sender<CaptureNotice>,
    pump: Option<Pump>,
}

impl CaptureController {
    pub fn new(source: Box<dyn CaptureSource>, store: SharedStore, config: ControllerConfig) -> Self {
        let (notices, _) = broadcast::channel(256);

        Self {
            source,
            store,
            config,
            state: Arc::new(Mutex::new(SessionState {
                status: CaptureStatus::Idle,
                session_id: None,
                started_at: None,
                sessions_started: 0,
                last_error: None,
            })),
            notices,
            pump: None,
        }
    }

    /// Start capturing. No-op while already capturing.
    pub async fn start(&mut self) -> ReplayResult<()> {
        if self.status().await == CaptureStatus::Capturing {
            warn!("Capture already active");
            return Ok(());
        }

        self.reap_finished_session().await;

        if !self.source.is_acquired() {
            self.source.acquire().await.map_err(|e| {
                error!("Failed to acquire capture source {}: {:#}", self.source.name(), e);
                ReplayError::source(format!("{:#}", e))
            })?;
        }

        let events = self
            .source
            .start_session(self.config.chunk_interval)
            .await
            .map_err(|e| {
                error!("Failed to start capture on {}: {:#}", self.source.name(), e);
                ReplayError::source(format!("{:#}", e))
            })?;

        let session_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            state.status = CaptureStatus::Capturing;
            state.session_id = Some(session_id);
            state.started_at = Some(Utc::now());
            state.sessions_started += 1;
        }

        let ctx = PumpContext {
            session_id,
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            notices: self.notices.clone(),
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump(ctx, events, stop_rx, SessionIngest::new(&self.config)));

        self.pump = Some(Pump {
            session_id,
            stop_tx,
            task,
        });

        info!(
            "Capture session {} started on {} ({}ms chunks)",
            session_id,
            self.source.name(),
            self.config.chunk_interval.as_millis()
        );
        let _ = self.notices.send(CaptureNotice::SessionStarted { session_id });

        Ok(())
    }

    /// Stop capturing, flushing the source's partial chunk into the store.
    ///
    /// No-op while idle.
    pub async fn stop(&mut self) -> ReplayResult<()> {
        if self.status().await == CaptureStatus::Idle {
            warn!("Capture not active");
            self.reap_finished_session().await;
            return Ok(());
        }

        let Some(pump) = self.pump.take() else {
            self.state.lock().await.status = CaptureStatus::Idle;
            return Ok(());
        };

        info!("Stopping capture session {}", pump.session_id);

        let ctx = PumpContext {
            session_id: pump.session_id,
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            notices: self.notices.clone(),
        };

        // Cancel the pump first so nothing from this session arrives later
        let _ = pump.stop_tx.send(());
        let PumpExit {
            mut ingest,
            failure,
        } = match pump.task.await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Capture pump task panicked: {}", e);
                PumpExit {
                    ingest: SessionIngest::new(&self.config),
                    failure: None,
                }
            }
        };

        let mut result = match self.source.stop_session().await {
            Ok(Some(trailing)) => {
                ctx.ingest(&mut ingest, trailing).await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                let err = ReplayError::capture_failed(format!("{:#}", e));
                error!("Capture source failed to finalize: {}", err);
                Err(err)
            }
        };

        if let Some(err) = failure {
            // A failed source is reacquired on the next start
            self.source.release();
            result = Err(err);
        }

        {
            let mut state = self.state.lock().await;
            state.status = CaptureStatus::Idle;
            if let Err(err) = &result {
                state.last_error = Some(err.clone());
            }
        }

        info!("Capture session {} stopped", pump.session_id);
        let _ = self.notices.send(CaptureNotice::SessionStopped {
            session_id: pump.session_id,
        });

        result
    }

    /// Stop any active session and release the capture source
    pub async fn shutdown(&mut self) -> ReplayResult<()> {
        let result = self.stop().await;
        self.source.release();
        info!("Capture controller shut down");
        result
    }

    pub async fn status(&self) -> CaptureStatus {
        self.state.lock().await.status
    }

    /// Current or most recent session
    pub async fn session_id(&self) -> Option<Uuid> {
        self.state.lock().await.session_id
    }

    pub async fn last_error(&self) -> Option<ReplayError> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn report(&self) -> ControllerStatus {
        let state = self.state.lock().await;
        ControllerStatus {
            status: state.status,
            session_id: state.session_id,
            session_started_at: state.started_at,
            sessions_started: state.sessions_started,
            last_error: state.last_error.as_ref().map(ToString::to_string),
            source: self.source.name().to_string(),
            mime_type: self.source.container().mime_type.clone(),
        }
    }

    /// Subscribe to capture notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureNotice> {
        self.notices.subscribe()
    }

    /// Sender side of the notification channel, for subscribers created later
    pub fn notices(&self) -> broadcast::Sender<CaptureNotice> {
        self.notices.clone()
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn container(&self) -> &ContainerFormat {
        self.source.container()
    }

    pub fn source_acquired(&self) -> bool {
        self.source.is_acquired()
    }

    pub async fn set_capacity(&self, seconds: u64) -> ReplayResult<usize> {
        self.store.write().await.set_capacity(seconds)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.store.read().await.snapshot()
    }

    pub async fn clear(&self) -> usize {
        self.store.write().await.clear()
    }

    /// Collect a session that ended on its own (source failure or end of input)
    async fn reap_finished_session(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };

        let _ = pump.stop_tx.send(());
        let failed = match pump.task.await {
            Ok(exit) => exit.failure.is_some(),
            Err(e) => {
                error!("Capture pump task panicked: {}", e);
                true
            }
        };

        // Whatever the source still buffers belongs to a dead session
        match self.source.stop_session().await {
            Ok(Some(chunk)) => warn!(
                "Discarded {} bytes left over from session {}",
                chunk.payload.len(),
                pump.session_id
            ),
            Ok(None) => {}
            Err(e) => warn!("Failed to reset capture source: {:#}", e),
        }

        if failed {
            info!(
                "Releasing capture source {} after failed session {}",
                self.source.name(),
                pump.session_id
            );
            self.source.release();
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.task.abort();
        }
        self.source.release();
    }
}
