//! Recording commands: start and stop both loops together.

use std::sync::Arc;

use tracing::warn;

use clarity_capture::CaptureScheduler;
use clarity_core::error::ClarityError;
use clarity_core::types::RecordingStatus;

use crate::summary::SummaryScheduler;

pub struct PipelineController {
    capture: Arc<CaptureScheduler>,
    summary: Arc<SummaryScheduler>,
}

impl PipelineController {
    pub fn new(capture: Arc<CaptureScheduler>, summary: Arc<SummaryScheduler>) -> Self {
        Self { capture, summary }
    }

    /// Start capturing and summarizing.
    ///
    /// `Conflict` when already recording; a failed capability probe leaves
    /// both loops stopped.
    pub async fn start_recording(&self) -> Result<RecordingStatus, ClarityError> {
        self.capture.start().await?;
        if let Err(e) = self.summary.start().await {
            warn!(error = %e, "Summary loop did not start");
        }
        Ok(self.capture.status())
    }

    /// Stop both loops. Stored traces and summaries are kept.
    pub async fn stop_recording(&self) -> Result<RecordingStatus, ClarityError> {
        self.capture.stop().await?;
        if self.summary.is_running().await {
            self.summary.stop().await?;
        }
        Ok(self.capture.status())
    }

    pub fn status(&self) -> RecordingStatus {
        self.capture.status()
    }

    /// Stop whatever is running; used on process shutdown.
    pub async fn shutdown(&self) {
        if self.capture.status().is_recording {
            if let Err(e) = self.capture.stop().await {
                warn!(error = %e, "Failed to stop capture loop");
            }
        }
        if self.summary.is_running().await {
            if let Err(e) = self.summary.stop().await {
                warn!(error = %e, "Failed to stop summary loop");
            }
        }
    }
}
