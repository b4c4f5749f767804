//! Camera acquisition worker
//!
//! One background thread per active [`FrameSource`]. The worker opens the
//! device through the ranked backend list, performs warm-up reads, then
//! publishes frames into the latest-frame slot until stopped or the device
//! goes away. The interactive side never touches the device directly; it
//! sees frames through the slot and lifecycle events through a channel.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backend::{default_backends, CameraBackend, CameraDevice};
use super::frame::{CapturedFrame, FrameSlot};
use super::{CaptureError, CaptureSettings};

/// Camera session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// No worker active
    Stopped,
    /// Worker spawned, device not yet delivering
    Starting,
    /// Frames are being delivered
    Running,
    /// Stop observed, device being released
    Stopping,
    /// The session ended in an error; an explicit restart is required
    Failed,
}

/// Lifecycle events delivered to the consumer
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// Device opened; reports the winning backend
    Opened { backend: &'static str },
    /// Session-fatal failure, human-readable
    Error(String),
    /// Worker finished and released the device
    Stopped,
}

/// State shared between the worker thread and the owning handle
struct SourceShared {
    state: Mutex<CameraState>,
    stop_requested: AtomicBool,
    slot: FrameSlot,
}

/// Owns one camera and its acquisition worker
pub struct FrameSource {
    settings: CaptureSettings,
    backends: Arc<Vec<Box<dyn CameraBackend>>>,
    shared: Arc<SourceShared>,
    events_tx: Sender<CameraEvent>,
    events_rx: Receiver<CameraEvent>,
    worker: Option<JoinHandle<()>>,
    done_rx: Option<Receiver<()>>,
}

impl FrameSource {
    /// Create a source over an explicit backend list
    pub fn new(settings: CaptureSettings, backends: Vec<Box<dyn CameraBackend>>) -> Self {
        let (events_tx, events_rx) = bounded(32);
        Self {
            settings,
            backends: Arc::new(backends),
            shared: Arc::new(SourceShared {
                state: Mutex::new(CameraState::Stopped),
                stop_requested: AtomicBool::new(false),
                slot: FrameSlot::default(),
            }),
            events_tx,
            events_rx,
            worker: None,
            done_rx: None,
        }
    }

    /// Create a source over the backends compiled into this build
    pub fn with_default_backends(settings: CaptureSettings) -> Self {
        Self::new(settings, default_backends())
    }

    /// Current lifecycle state
    pub fn state(&self) -> CameraState {
        *self.shared.state.lock()
    }

    /// True while a worker is starting or delivering frames
    pub fn is_active(&self) -> bool {
        matches!(self.state(), CameraState::Starting | CameraState::Running)
    }

    /// Receiver for lifecycle events; clonable, never blocks the worker
    pub fn events(&self) -> Receiver<CameraEvent> {
        self.events_rx.clone()
    }

    /// Atomically read the most recent frame
    pub fn latest_frame(&self) -> Option<Arc<CapturedFrame>> {
        self.shared.slot.snapshot()
    }

    /// Start acquisition from the camera at `camera_index`
    ///
    /// A no-op (not a second device open) when the worker is already
    /// starting or running.
    pub fn start(&mut self, camera_index: u32) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                CameraState::Starting | CameraState::Running => {
                    debug!("Camera worker already active; start is a no-op");
                    return Ok(());
                }
                _ => *state = CameraState::Starting,
            }
        }

        // Reap a previously finished worker before spawning the next
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.slot.clear();

        let (done_tx, done_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let backends = Arc::clone(&self.backends);
        let settings = self.settings.clone();
        let events = self.events_tx.clone();

        let handle = thread::Builder::new()
            .name("camera-worker".to_string())
            .spawn(move || {
                run_worker(camera_index, &settings, &backends, &shared, &events);
                drop(done_tx);
            })
            .context("failed to spawn camera worker thread")?;

        self.worker = Some(handle);
        self.done_rx = Some(done_rx);
        Ok(())
    }

    /// Request a cooperative stop and wait for the worker to finish
    ///
    /// The stop flag is observed between reads, so the wait is bounded by
    /// one read cycle plus backoff. If the worker misses the configured
    /// deadline it is abandoned: the thread cannot be force-killed, the
    /// device may not be released cleanly, and the session is marked
    /// Failed.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        info!("Stopping camera worker");
        self.shared.stop_requested.store(true, Ordering::SeqCst);

        let timeout = Duration::from_millis(self.settings.stop_timeout_ms);
        let timed_out = match self.done_rx.take() {
            Some(done) => matches!(done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => false,
        };

        if timed_out {
            error!(
                "Camera worker did not stop within {:?}; abandoning thread, device may not be released",
                timeout
            );
            *self.shared.state.lock() = CameraState::Failed;
            drop(worker);
        } else {
            let _ = worker.join();
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body: open, warm up, read loop, release
fn run_worker(
    camera_index: u32,
    settings: &CaptureSettings,
    backends: &[Box<dyn CameraBackend>],
    shared: &SourceShared,
    events: &Sender<CameraEvent>,
) {
    info!("Camera worker started for camera {}", camera_index);

    let mut device: Option<Box<dyn CameraDevice>> = None;
    for backend in backends {
        match backend.open(camera_index) {
            Ok(dev) => {
                info!("Opened camera {} via {} backend", camera_index, backend.name());
                send_event(events, CameraEvent::Opened {
                    backend: backend.name(),
                });
                device = Some(dev);
                break;
            }
            Err(e) => {
                warn!(
                    "Backend {} could not open camera {}: {}",
                    backend.name(),
                    camera_index,
                    e
                );
            }
        }
    }

    let Some(mut device) = device else {
        let message = if backends.is_empty() {
            "no camera backends compiled into this build".to_string()
        } else {
            format!(
                "could not open camera {} with any available backend",
                camera_index
            )
        };
        error!("{}", message);
        *shared.state.lock() = CameraState::Failed;
        send_event(events, CameraEvent::Error(message));
        return;
    };

    // The first frames after open are often dark or stale; read and discard
    for _ in 0..settings.warmup_frames {
        if shared.stop_requested.load(Ordering::SeqCst) {
            break;
        }
        let _ = device.read_frame();
    }

    *shared.state.lock() = CameraState::Running;

    let mut sequence = 0u64;
    let mut consecutive_failures = 0u32;

    while !shared.stop_requested.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(image) => {
                consecutive_failures = 0;
                sequence += 1;
                shared.slot.publish(CapturedFrame::new(image, sequence));
                thread::sleep(Duration::from_millis(settings.frame_interval_ms));
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures > settings.max_read_retries {
                    let fatal = CaptureError::Disconnected(e.to_string());
                    let message = format!("camera {}: {}", camera_index, fatal);
                    error!("{}", message);
                    send_event(events, CameraEvent::Error(message));
                    break;
                }
                warn!(
                    "Transient frame read failure ({}/{}): {}",
                    consecutive_failures, settings.max_read_retries, e
                );
                thread::sleep(Duration::from_millis(settings.retry_backoff_ms));
            }
        }
    }

    *shared.state.lock() = CameraState::Stopping;
    drop(device);
    *shared.state.lock() = CameraState::Stopped;
    send_event(events, CameraEvent::Stopped);
    info!(
        "Camera worker for camera {} finished after {} frames",
        camera_index, sequence
    );
}

/// Deliver an event without ever blocking the worker
fn send_event(events: &Sender<CameraEvent>, event: CameraEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("Dropping camera event, channel unavailable: {}", e);
    }
}
