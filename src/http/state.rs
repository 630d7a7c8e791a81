use crate::buffer::SharedStore;
use crate::capture::{CaptureController, CaptureNotice};
use crate::export::{ArtifactSink, Exporter};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single capture controller; the mutex serializes start/stop
    pub controller: Arc<Mutex<CaptureController>>,

    /// Segment store, read directly for snapshots and status
    pub store: SharedStore,

    /// Builds artifacts from snapshots
    pub exporter: Arc<Exporter>,

    /// Where `/replay/save/disk` puts artifacts
    pub sink: Arc<dyn ArtifactSink>,

    /// Capture notifications, for the event stream
    pub notices: broadcast::Sender<CaptureNotice>,
}

impl AppState {
    pub fn new(controller: CaptureController, exporter: Exporter, sink: Arc<dyn ArtifactSink>) -> Self {
        let store = controller.store();
        let notices = controller.notices();

        Self {
            controller: Arc::new(Mutex::new(controller)),
            store,
            exporter: Arc::new(exporter),
            sink,
            notices,
        }
    }
}
