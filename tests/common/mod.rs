// Shared fixtures for integration tests
//
// `ScriptedSource` is a capture source driven by the test through a
// `Script` handle: the test decides when chunks arrive, when the source
// fails and what the partial chunk on stop looks like.

#![allow(dead_code)]

use anyhow::{bail, Result};
use instant_replay::{
    CaptureController, CaptureEvent, CaptureSource, CaptureStatus, CapacityRange, Chunk,
    ContainerFormat, ControllerConfig, DurationMode, SegmentStore, SharedStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// Bitrate used by test controllers: 1000 bytes is one second of media
pub const BYTES_PER_SECOND: u64 = 1000;

#[derive(Debug, Default)]
struct ScriptState {
    acquired: bool,
    acquire_count: usize,
    release_count: usize,
    sessions: usize,
    fail_acquire: bool,
    events: Option<mpsc::Sender<CaptureEvent>>,
    trailing: Option<Chunk>,
}

/// Test-side handle to a `ScriptedSource`
#[derive(Debug, Clone, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    /// Deliver a chunk on the current session
    pub async fn emit(&self, payload: Vec<u8>, timestamp_ms: u64) -> Result<()> {
        let Some(events) = self.sender() else {
            bail!("no active session");
        };
        events
            .send(CaptureEvent::Chunk(Chunk {
                payload,
                timestamp_ms,
            }))
            .await?;
        Ok(())
    }

    /// Report a failure and end the session
    pub async fn fail(&self, reason: &str) -> Result<()> {
        let Some(events) = self.0.lock().unwrap().events.take() else {
            bail!("no active session");
        };
        events.send(CaptureEvent::Failed(reason.to_string())).await?;
        Ok(())
    }

    /// End the session normally, as on end of input
    pub fn finish(&self) {
        self.0.lock().unwrap().events.take();
    }

    /// Sender of the current session, kept by tests that outlive it
    pub fn sender(&self) -> Option<mpsc::Sender<CaptureEvent>> {
        self.0.lock().unwrap().events.clone()
    }

    /// Partial chunk handed back by the next `stop_session`
    pub fn set_trailing(&self, payload: Vec<u8>, timestamp_ms: u64) {
        self.0.lock().unwrap().trailing = Some(Chunk {
            payload,
            timestamp_ms,
        });
    }

    pub fn fail_next_acquire(&self) {
        self.0.lock().unwrap().fail_acquire = true;
    }

    pub fn acquire_count(&self) -> usize {
        self.0.lock().unwrap().acquire_count
    }

    pub fn release_count(&self) -> usize {
        self.0.lock().unwrap().release_count
    }

    pub fn sessions(&self) -> usize {
        self.0.lock().unwrap().sessions
    }

    pub fn is_acquired(&self) -> bool {
        self.0.lock().unwrap().acquired
    }
}

pub struct ScriptedSource {
    script: Script,
    container: ContainerFormat,
}

impl ScriptedSource {
    pub fn new() -> (Self, Script) {
        let script = Script::default();
        let source = Self {
            script: script.clone(),
            container: ContainerFormat::default(),
        };
        (source, script)
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScriptedSource {
    async fn acquire(&mut self) -> Result<()> {
        let mut state = self.script.0.lock().unwrap();
        if state.fail_acquire {
            state.fail_acquire = false;
            bail!("camera permission denied");
        }
        state.acquired = true;
        state.acquire_count += 1;
        Ok(())
    }

    async fn start_session(&mut self, _interval: Duration) -> Result<mpsc::Receiver<CaptureEvent>> {
        let mut state = self.script.0.lock().unwrap();
        if !state.acquired {
            bail!("source not acquired");
        }
        let (events, events_rx) = mpsc::channel(16);
        state.events = Some(events);
        state.sessions += 1;
        Ok(events_rx)
    }

    async fn stop_session(&mut self) -> Result<Option<Chunk>> {
        let mut state = self.script.0.lock().unwrap();
        state.events = None;
        Ok(state.trailing.take())
    }

    fn release(&mut self) {
        let mut state = self.script.0.lock().unwrap();
        if state.acquired {
            state.acquired = false;
            state.release_count += 1;
        }
    }

    fn is_acquired(&self) -> bool {
        self.script.is_acquired()
    }

    fn container(&self) -> &ContainerFormat {
        &self.container
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Controller over a scripted source with a 15s buffer and size-based durations
pub fn scripted_controller() -> (CaptureController, Script, SharedStore) {
    scripted_controller_with(DurationMode::Bitrate)
}

pub fn scripted_controller_with(
    duration_mode: DurationMode,
) -> (CaptureController, Script, SharedStore) {
    let (source, script) = ScriptedSource::new();
    let store = SegmentStore::new(15, CapacityRange::default())
        .unwrap()
        .into_shared();

    let config = ControllerConfig {
        chunk_interval: Duration::from_millis(100),
        duration_mode,
        bytes_per_second: BYTES_PER_SECOND,
    };

    let controller = CaptureController::new(Box::new(source), store.clone(), config);
    (controller, script, store)
}

/// Payload worth `secs` seconds at `BYTES_PER_SECOND`, filled with `tag`
pub fn media(secs: u64, tag: u8) -> Vec<u8> {
    vec![tag; (secs * BYTES_PER_SECOND) as usize]
}

/// Wait until the store has appended `count` segments in total
pub async fn wait_for_appended(store: &SharedStore, count: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while store.read().await.stats().total_appended < count {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} appended segments",
            count
        );
        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(controller: &CaptureController, status: CaptureStatus) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while controller.status().await != status {
        assert!(Instant::now() < deadline, "timed out waiting for {:?}", status);
        sleep(Duration::from_millis(5)).await;
    }
}
