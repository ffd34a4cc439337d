//! Wiring of every service the command surface needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use clarity_capture::{CaptureScheduler, CaptureService, FrameEncoder, PipelineState};
use clarity_core::config::ClarityConfig;
use clarity_core::error::ClarityError;
use clarity_core::events::EventBus;
use clarity_storage::{
    ApiRequestRepository, DailySummaryRepository, Database, SettingsRepository,
    StatisticsAggregator, SummaryRepository, TraceRepository,
};
use clarity_vision::{RemotePolicy, RemoteVisionClient, VideoAssembler, VideoEncoder, VisionTransport};

use crate::controller::PipelineController;
use crate::daily::DailySummarizer;
use crate::diagnostics::PipelineDiagnostics;
use crate::settings::RuntimeSettings;
use crate::summary::{SummaryPolicy, SummaryScheduler};

pub const DATABASE_FILE: &str = "clarity.db";

/// One connection per writer plus one for reads.
pub struct Databases {
    pub capture: Arc<Database>,
    pub summary: Arc<Database>,
    pub read: Arc<Database>,
}

impl Databases {
    /// Open three handles on `<data_dir>/clarity.db`.
    pub fn open(data_dir: &Path) -> Result<Self, ClarityError> {
        let path = data_dir.join(DATABASE_FILE);
        Ok(Self {
            capture: Arc::new(Database::new(&path)?),
            summary: Arc::new(Database::new(&path)?),
            read: Arc::new(Database::new(&path)?),
        })
    }

    /// All roles on one handle, e.g. an in-memory database.
    pub fn shared(db: Arc<Database>) -> Self {
        Self {
            capture: Arc::clone(&db),
            summary: Arc::clone(&db),
            read: db,
        }
    }
}

/// External capabilities the runtime is built around.
pub struct Capabilities {
    pub capture: Arc<dyn CaptureService>,
    pub transport: Arc<dyn VisionTransport>,
    pub video: Arc<dyn VideoEncoder>,
}

pub struct PipelineRuntime {
    pub data_dir: PathBuf,
    pub state: Arc<PipelineState>,
    pub settings: Arc<RuntimeSettings>,
    pub events: EventBus,
    pub controller: Arc<PipelineController>,
    pub summary: Arc<SummaryScheduler>,
    pub daily: Arc<DailySummarizer>,
    pub traces: Arc<TraceRepository>,
    pub summaries: Arc<SummaryRepository>,
    pub statistics: Arc<StatisticsAggregator>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

impl PipelineRuntime {
    pub fn build(
        config: &ClarityConfig,
        data_dir: &Path,
        dbs: Databases,
        caps: Capabilities,
    ) -> Result<Self, ClarityError> {
        let recordings = data_dir.join("recordings");
        let events = EventBus::new();

        let summary_writes = Arc::new(SummaryRepository::new(Arc::clone(&dbs.summary)));
        let cursor = summary_writes.latest_end()?;
        if let Some(cursor) = cursor {
            info!(%cursor, "Resuming summaries after last stored window");
        }
        let state = Arc::new(PipelineState::with_cursor(cursor));

        let settings = Arc::new(RuntimeSettings::load(
            SettingsRepository::new(Arc::clone(&dbs.read)),
            config,
        )?);

        let capture = Arc::new(CaptureScheduler::new(
            Arc::clone(&caps.capture),
            Arc::new(FrameEncoder::new(&recordings, config.capture.jpeg_quality)),
            Arc::new(TraceRepository::new(Arc::clone(&dbs.capture))),
            Arc::clone(&state),
            events.clone(),
            Duration::from_millis(config.capture.interval_ms),
        ));

        let summary_traces = Arc::new(TraceRepository::new(Arc::clone(&dbs.summary)));
        let assembler = Arc::new(VideoAssembler::new(
            Arc::clone(&summary_traces),
            Arc::clone(&caps.video),
            recordings.join("videos"),
            config.summary.fps,
            config.summary.max_frames_per_window,
        ));
        let client = Arc::new(RemoteVisionClient::new(
            caps.transport,
            Arc::new(ApiRequestRepository::new(Arc::clone(&dbs.summary))),
            RemotePolicy::from(&config.remote),
        ));

        let summary = Arc::new(SummaryScheduler::new(
            Arc::clone(&summary_traces),
            Arc::clone(&summary_writes),
            assembler,
            Arc::clone(&client),
            Arc::clone(&settings),
            Arc::clone(&state),
            events.clone(),
            SummaryPolicy::from(&config.summary),
        ));

        let daily = Arc::new(DailySummarizer::new(
            summary_traces,
            summary_writes,
            Arc::new(DailySummaryRepository::new(Arc::clone(&dbs.summary))),
            client,
            Arc::clone(&settings),
            events.clone(),
        ));

        let controller = Arc::new(PipelineController::new(capture, Arc::clone(&summary)));
        let statistics = Arc::new(StatisticsAggregator::new(Arc::clone(&dbs.read)));
        let diagnostics = Arc::new(PipelineDiagnostics::new(
            caps.capture,
            caps.video,
            Arc::clone(&statistics),
            Arc::clone(&settings),
            Arc::clone(&controller),
        ));

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            state,
            settings,
            events,
            controller,
            summary,
            daily,
            traces: Arc::new(TraceRepository::new(Arc::clone(&dbs.read))),
            summaries: Arc::new(SummaryRepository::new(Arc::clone(&dbs.read))),
            statistics,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubEncoder;
    use chrono::{TimeZone, Utc};
    use clarity_capture::MockCaptureService;
    use clarity_core::types::TimeWindow;
    use clarity_vision::testing::ScriptedTransport;

    fn caps() -> Capabilities {
        Capabilities {
            capture: Arc::new(MockCaptureService::new()),
            transport: Arc::new(ScriptedTransport::new()),
            video: Arc::new(StubEncoder::default()),
        }
    }

    #[test]
    fn test_cursor_resumes_from_latest_summary() {
        let dir = tempfile::tempdir().unwrap();
        let dbs = Databases::open(dir.path()).unwrap();
        let end = Utc.timestamp_opt(1_700_000_045, 0).unwrap();
        SummaryRepository::new(Arc::clone(&dbs.summary))
            .insert(
                TimeWindow::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), end),
                "earlier",
                10,
            )
            .unwrap();

        let runtime =
            PipelineRuntime::build(&ClarityConfig::default(), dir.path(), dbs, caps()).unwrap();
        assert_eq!(runtime.state.cursor(), Some(end));
        assert!(dir.path().join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_capture_visible_on_read_handle() {
        let dir = tempfile::tempdir().unwrap();
        let dbs = Databases::open(dir.path()).unwrap();
        let runtime =
            PipelineRuntime::build(&ClarityConfig::default(), dir.path(), dbs, caps()).unwrap();

        runtime.controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        runtime.controller.stop_recording().await.unwrap();

        assert!(runtime.traces.count().unwrap() >= 1);
        assert!(dir.path().join("recordings").exists());
    }
}
