// Byte-stream capture source
//
// Wraps any async byte reader (a media file, an encoder's stdout, a pipe)
// and turns it into timesliced chunks, the way a media recorder emits one
// data event per interval:
// - the reader is owned by a background task for as long as the source is acquired
// - while no session is active, bytes are read and discarded so the feed stays live
// - during a session, bytes accumulate and are emitted as one chunk per tick
// - stopping hands back whatever accumulated since the last tick
// - end of input closes the session channel, a read error sends `Failed`

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::source::{CaptureEvent, CaptureSource, Chunk, ContainerFormat};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

const READ_BUFFER_BYTES: usize = 64 * 1024;
const REFILL_PERIOD: Duration = Duration::from_millis(100);

enum Origin {
    File {
        path: PathBuf,
        bytes_per_second: u64,
    },
    Command {
        program: String,
        args: Vec<String>,
    },
    Reader {
        reader: Mutex<Option<BoxedReader>>,
        bytes_per_second: Option<u64>,
    },
}

enum Control {
    Start {
        events: mpsc::Sender<CaptureEvent>,
        interval: Duration,
    },
    Stop {
        reply: oneshot::Sender<Option<Chunk>>,
    },
}

struct ReaderHandle {
    control: mpsc::Sender<Control>,
    task: JoinHandle<()>,
    child: Option<Mutex<Child>>,
}

/// Capture source backed by an async byte stream
pub struct StreamSource {
    name: String,
    origin: Origin,
    container: ContainerFormat,
    handle: Option<ReaderHandle>,
}

impl StreamSource {
    /// Replay a media file as a live feed, throttled to `bytes_per_second`
    pub fn file(path: impl Into<PathBuf>, bytes_per_second: u64, container: ContainerFormat) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            origin: Origin::File {
                path,
                bytes_per_second: bytes_per_second.max(1),
            },
            container,
            handle: None,
        }
    }

    /// Spawn an encoder process on acquire and read its stdout
    pub fn command(program: impl Into<String>, args: Vec<String>, container: ContainerFormat) -> Self {
        let program = program.into();
        Self {
            name: format!("command:{}", program),
            origin: Origin::Command { program, args },
            container,
            handle: None,
        }
    }

    /// Read from an arbitrary async reader, optionally throttled
    pub fn from_reader<R>(
        name: impl Into<String>,
        reader: R,
        bytes_per_second: Option<u64>,
        container: ContainerFormat,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            origin: Origin::Reader {
                reader: Mutex::new(Some(Box::new(reader))),
                bytes_per_second: bytes_per_second.map(|bps| bps.max(1)),
            },
            container,
            handle: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for StreamSource {
    async fn acquire(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let (reader, throttle, child): (BoxedReader, Option<u64>, Option<Child>) =
            match &mut self.origin {
                Origin::File {
                    path,
                    bytes_per_second,
                } => {
                    let file = tokio::fs::File::open(&*path)
                        .await
                        .with_context(|| format!("Failed to open capture file: {}", path.display()))?;
                    (Box::new(file), Some(*bytes_per_second), None)
                }

                Origin::Command { program, args } => {
                    let mut child = Command::new(&*program)
                        .args(args.iter())
                        .stdin(Stdio::null())
                        .stdout(Stdio::piped())
                        .stderr(Stdio::null())
                        .kill_on_drop(true)
                        .spawn()
                        .with_context(|| format!("Failed to spawn capture command: {}", program))?;

                    let Some(stdout) = child.stdout.take() else {
                        bail!("Capture command {} has no stdout", program);
                    };
                    (Box::new(stdout), None, Some(child))
                }

                Origin::Reader {
                    reader,
                    bytes_per_second,
                } => {
                    let Some(reader) = reader.get_mut().take() else {
                        bail!("Capture source {} cannot be acquired again", self.name);
                    };
                    (reader, *bytes_per_second, None)
                }
            };

        let (control, control_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_reader(self.name.clone(), reader, control_rx, throttle));

        self.handle = Some(ReaderHandle {
            control,
            task,
            child: child.map(Mutex::new),
        });

        info!("Capture source acquired: {}", self.name);
        Ok(())
    }

    async fn start_session(&mut self, interval: Duration) -> Result<mpsc::Receiver<CaptureEvent>> {
        let Some(handle) = &self.handle else {
            bail!("Capture source {} is not acquired", self.name);
        };

        let (events, events_rx) = mpsc::channel(100);
        handle
            .control
            .send(Control::Start { events, interval })
            .await
            .map_err(|_| anyhow!("Capture source {} reader has exited", self.name))?;

        debug!(
            "Capture session started on {} ({}ms chunks)",
            self.name,
            interval.as_millis()
        );
        Ok(events_rx)
    }

    async fn stop_session(&mut self) -> Result<Option<Chunk>> {
        let Some(handle) = &self.handle else {
            return Ok(None);
        };

        let (reply, reply_rx) = oneshot::channel();
        if handle.control.send(Control::Stop { reply }).await.is_err() {
            warn!("Capture source {} reader exited before stop", self.name);
            return Ok(None);
        }

        Ok(reply_rx.await.unwrap_or(None))
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.task.abort();
            if let Some(child) = handle.child.as_mut() {
                if let Err(e) = child.get_mut().start_kill() {
                    warn!("Failed to kill capture process for {}: {}", self.name, e);
                }
            }
            info!("Capture source released: {}", self.name);
        }
    }

    fn is_acquired(&self) -> bool {
        self.handle.is_some()
    }

    fn container(&self) -> &ContainerFormat {
        &self.container
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Milliseconds since acquire, forced to advance on every call
struct Clock {
    origin: Instant,
    last_ms: Option<u64>,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: None,
        }
    }

    fn next_ms(&mut self) -> u64 {
        let now = self.origin.elapsed().as_millis() as u64;
        let ms = match self.last_ms {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_ms = Some(ms);
        ms
    }
}

struct ActiveSession {
    events: mpsc::Sender<CaptureEvent>,
    ticker: time::Interval,
    pending: Vec<u8>,
    /// Set once the receiver is gone; bytes are then held for the stop reply
    detached: bool,
}

impl ActiveSession {
    async fn flush(&mut self, clock: &mut Clock) {
        if self.pending.is_empty() || self.detached {
            return;
        }

        let chunk = Chunk {
            payload: std::mem::take(&mut self.pending),
            timestamp_ms: clock.next_ms(),
        };

        if let Err(mpsc::error::SendError(CaptureEvent::Chunk(chunk))) =
            self.events.send(CaptureEvent::Chunk(chunk)).await
        {
            self.pending = chunk.payload;
            self.detached = true;
        }
    }
}

async fn next_tick(session: &mut Option<ActiveSession>) {
    match session {
        Some(active) => {
            active.ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Bytes granted per refill period at `bytes_per_second`, at least one
fn refill_quantum(bytes_per_second: u64) -> u64 {
    (bytes_per_second.saturating_mul(REFILL_PERIOD.as_millis() as u64) / 1000).max(1)
}

async fn run_reader(
    name: String,
    mut reader: BoxedReader,
    mut control_rx: mpsc::Receiver<Control>,
    bytes_per_second: Option<u64>,
) {
    let mut clock = Clock::new();
    let mut session: Option<ActiveSession> = None;
    let mut scratch = vec![0u8; READ_BUFFER_BYTES];
    let mut exhausted = false;
    // Set by a read error; later sessions get the failure instead of a clean close
    let mut failure: Option<String> = None;

    let quantum = bytes_per_second.map(refill_quantum).unwrap_or(0);
    let burst = bytes_per_second.unwrap_or(0).max(quantum);
    let mut budget = quantum;
    let mut refill = time::interval(REFILL_PERIOD);
    refill.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let throttled = bytes_per_second.is_some();
        let can_read = !exhausted && (!throttled || budget > 0);
        let limit = if throttled {
            (budget as usize).min(scratch.len())
        } else {
            scratch.len()
        };

        tokio::select! {
            biased;

            control = control_rx.recv() => match control {
                None => break,
                Some(Control::Start { events, interval }) => {
                    if let Some(reason) = &failure {
                        warn!("Capture source {} failed earlier; rejecting new session", name);
                        let _ = events.send(CaptureEvent::Failed(reason.clone())).await;
                        continue;
                    }
                    if exhausted {
                        debug!("Capture source {} has no more input; closing new session", name);
                        continue;
                    }
                    if session.is_some() {
                        warn!("Capture source {} replaced an active session", name);
                    }
                    let mut ticker = time::interval_at(Instant::now() + interval, interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    session = Some(ActiveSession {
                        events,
                        ticker,
                        pending: Vec::new(),
                        detached: false,
                    });
                }
                Some(Control::Stop { reply }) => {
                    let trailing = session
                        .take()
                        .filter(|active| !active.pending.is_empty())
                        .map(|active| Chunk {
                            payload: active.pending,
                            timestamp_ms: clock.next_ms(),
                        });
                    let _ = reply.send(trailing);
                }
            },

            _ = next_tick(&mut session) => {
                if let Some(active) = session.as_mut() {
                    active.flush(&mut clock).await;
                }
            }

            _ = refill.tick(), if throttled => {
                budget = budget.saturating_add(quantum).min(burst);
            }

            result = reader.read(&mut scratch[..limit]), if can_read => match result {
                Ok(0) => {
                    exhausted = true;
                    info!("Capture source {} reached end of input", name);
                    if let Some(active) = session.as_mut() {
                        active.flush(&mut clock).await;
                        if !active.detached {
                            // Dropping the sender tells the session it completed
                            session = None;
                        }
                    }
                }
                Ok(n) => {
                    if throttled {
                        budget = budget.saturating_sub(n as u64);
                    }
                    if let Some(active) = session.as_mut() {
                        if !active.detached {
                            active.pending.extend_from_slice(&scratch[..n]);
                        }
                    }
                }
                Err(e) => {
                    exhausted = true;
                    error!("Capture source {} read failed: {}", name, e);
                    let reason = e.to_string();
                    if let Some(active) = session.take() {
                        let _ = active.events.send(CaptureEvent::Failed(reason.clone())).await;
                    }
                    failure = Some(reason);
                }
            },
        }
    }

    debug!("Capture source {} reader stopped", name);
}
