//! Self-checks for a pipeline that records but produces no summaries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use clarity_capture::CaptureService;
use clarity_core::error::ClarityError;
use clarity_storage::StatisticsAggregator;
use clarity_vision::VideoEncoder;

use crate::controller::PipelineController;
use crate::settings::RuntimeSettings;

/// Whether the video tool could be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub available: bool,
    /// `None` when the encoder needs no external binary.
    pub path: Option<String>,
    pub error: Option<String>,
}

/// Everything a summary cycle depends on, in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub api_key_configured: bool,
    pub video_tool: ToolStatus,
    pub today_screenshots: u64,
    pub summary_interval_seconds: u64,
    pub is_recording: bool,
    pub storage_path: String,
}

/// Result of one trial capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureCheck {
    pub ok: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub non_blank_percent: Option<f64>,
    pub unique_colors: Option<usize>,
    /// A blank image usually means screen-recording permission is missing.
    pub mostly_blank: bool,
    pub error: Option<String>,
}

impl CaptureCheck {
    fn failed(error: ClarityError) -> Self {
        Self {
            ok: false,
            width: None,
            height: None,
            non_blank_percent: None,
            unique_colors: None,
            mostly_blank: false,
            error: Some(error.to_string()),
        }
    }
}

pub struct PipelineDiagnostics {
    capture: Arc<dyn CaptureService>,
    video: Arc<dyn VideoEncoder>,
    statistics: Arc<StatisticsAggregator>,
    settings: Arc<RuntimeSettings>,
    controller: Arc<PipelineController>,
}

impl PipelineDiagnostics {
    pub fn new(
        capture: Arc<dyn CaptureService>,
        video: Arc<dyn VideoEncoder>,
        statistics: Arc<StatisticsAggregator>,
        settings: Arc<RuntimeSettings>,
        controller: Arc<PipelineController>,
    ) -> Self {
        Self {
            capture,
            video,
            statistics,
            settings,
            controller,
        }
    }

    /// Check the API key, the video tool, today's capture count and the
    /// recording state.
    pub async fn report(&self) -> Result<PipelineReport, ClarityError> {
        let video_tool = match self.video.locate().await {
            Ok(path) => ToolStatus {
                available: true,
                path: path.map(|p| p.display().to_string()),
                error: None,
            },
            Err(e) => ToolStatus {
                available: false,
                path: None,
                error: Some(e.to_string()),
            },
        };
        let today = self.statistics.today_statistics()?;
        let status = self.controller.status();

        let report = PipelineReport {
            api_key_configured: self.settings.api_key().is_some(),
            video_tool,
            today_screenshots: today.screenshot_count,
            summary_interval_seconds: self.settings.summary_interval_seconds(),
            is_recording: status.is_recording,
            storage_path: status.storage_path,
        };
        info!(?report, "Pipeline diagnostics");
        Ok(report)
    }

    /// Take one screenshot without storing it and judge whether it shows
    /// anything.
    pub async fn check_capture(&self) -> CaptureCheck {
        if let Err(e) = self.capture.probe().await {
            warn!(error = %e, "Capture probe failed");
            return CaptureCheck::failed(e);
        }
        let frame = match self.capture.capture_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Trial capture failed");
                return CaptureCheck::failed(e);
            }
        };

        let content = frame.content();
        if content.is_mostly_blank() {
            warn!(
                non_blank_percent = content.non_blank_percent,
                unique_colors = content.unique_colors,
                "Trial capture is mostly blank, screen-recording permission may be missing"
            );
        }
        CaptureCheck {
            ok: true,
            width: Some(frame.width),
            height: Some(frame.height),
            non_blank_percent: Some(content.non_blank_percent),
            unique_colors: Some(content.unique_colors),
            mostly_blank: content.is_mostly_blank(),
            error: None,
        }
    }
}
