//! Fixed-cadence capture loop.
//!
//! Each tick grabs one frame, encodes it on a blocking thread, appends a
//! trace and bumps the counter. A failed tick is logged and skipped; the
//! loop itself only ends on stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clarity_core::error::ClarityError;
use clarity_core::events::EventBus;
use clarity_core::types::{RecordingStatus, ScreenshotTrace};
use clarity_storage::TraceRepository;

use crate::encoder::FrameEncoder;
use crate::state::PipelineState;
use crate::CaptureService;

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Everything one capture cycle needs. Cloned into the spawned task.
#[derive(Clone)]
struct CaptureCycle {
    service: Arc<dyn CaptureService>,
    encoder: Arc<FrameEncoder>,
    traces: Arc<TraceRepository>,
    state: Arc<PipelineState>,
    events: EventBus,
}

impl CaptureCycle {
    async fn run(&self) -> Result<ScreenshotTrace, ClarityError> {
        let frame = self.service.capture_frame().await?;
        let captured_at = frame.captured_at;
        let seq = self.state.screenshots_count() + 1;

        let encoder = Arc::clone(&self.encoder);
        let encoded = tokio::task::spawn_blocking(move || encoder.encode(frame, seq))
            .await
            .map_err(|e| ClarityError::Encoding(format!("encoder task failed: {}", e)))??;

        let file_path = encoded.path.to_string_lossy().to_string();
        let id = match self.traces.append(
            captured_at,
            &file_path,
            encoded.width,
            encoded.height,
            encoded.file_size,
        ) {
            Ok(id) => id,
            Err(e) => {
                // Nothing references the file without its trace row.
                if let Err(rm) = std::fs::remove_file(&encoded.path) {
                    warn!(path = %file_path, error = %rm, "Failed to remove orphaned frame");
                }
                return Err(e);
            }
        };

        self.state.record_capture();
        self.events.notify_statistics_changed();

        Ok(ScreenshotTrace {
            id,
            timestamp: captured_at,
            file_path,
            width: encoded.width,
            height: encoded.height,
            file_size: encoded.file_size,
        })
    }
}

/// Owns the capture loop and the recording flag.
pub struct CaptureScheduler {
    cycle: CaptureCycle,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl CaptureScheduler {
    pub fn new(
        service: Arc<dyn CaptureService>,
        encoder: Arc<FrameEncoder>,
        traces: Arc<TraceRepository>,
        state: Arc<PipelineState>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            cycle: CaptureCycle {
                service,
                encoder,
                traces,
                state,
                events,
            },
            interval,
            worker: Mutex::new(None),
        }
    }

    /// Begin recording.
    ///
    /// Fails with `Conflict` when already recording, or with `Capture` when
    /// the capability probe fails; in both cases nothing is started.
    pub async fn start(&self) -> Result<(), ClarityError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(ClarityError::Conflict("Recording is already active".into()));
        }

        self.cycle.service.probe().await?;

        let state = &self.cycle.state;
        state.begin_session(Utc::now());
        state.set_recording(true);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(capture_loop(
            self.cycle.clone(),
            self.interval,
            cancel.clone(),
        ));
        *worker = Some(Worker { handle, cancel });

        info!(interval_ms = self.interval.as_millis() as u64, "Recording started");
        self.cycle.events.notify_statistics_changed();
        Ok(())
    }

    /// Stop recording and wait for the in-flight cycle to finish.
    ///
    /// Persisted traces are untouched. Fails with `Conflict` when idle.
    pub async fn stop(&self) -> Result<(), ClarityError> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Err(ClarityError::Conflict("Recording is not active".into()));
        };

        self.cycle.state.set_recording(false);
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Capture loop terminated abnormally");
        }

        info!(
            screenshots = self.cycle.state.screenshots_count(),
            "Recording stopped"
        );
        self.cycle.events.notify_statistics_changed();
        Ok(())
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            is_recording: self.cycle.state.is_recording(),
            screenshots_count: self.cycle.state.screenshots_count(),
            storage_path: self.cycle.encoder.root().to_string_lossy().to_string(),
        }
    }

    /// Run a single capture cycle outside the loop.
    pub async fn capture_once(&self) -> Result<ScreenshotTrace, ClarityError> {
        self.cycle.run().await
    }
}

async fn capture_loop(cycle: CaptureCycle, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match cycle.run().await {
                    Ok(trace) => debug!(id = trace.id, path = %trace.file_path, "Frame captured"),
                    Err(e) => warn!(error = %e, "Capture cycle failed"),
                }
            }
        }
    }
    debug!("Capture loop exited");
}
