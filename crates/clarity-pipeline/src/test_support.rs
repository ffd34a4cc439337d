//! Shared fixture for the pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

use clarity_capture::PipelineState;
use clarity_core::config::ClarityConfig;
use clarity_core::events::EventBus;
use clarity_storage::{
    ApiRequestRepository, DailySummaryRepository, Database, SettingsRepository,
    SummaryRepository, TraceRepository,
};
use clarity_vision::testing::ScriptedTransport;
use clarity_vision::{
    AssembleError, RemotePolicy, RemoteVisionClient, VideoAssembler, VideoEncoder, VideoOptions,
};

use crate::daily::DailySummarizer;
use crate::settings::RuntimeSettings;
use crate::summary::{SummaryPolicy, SummaryScheduler};

/// Writes a placeholder file instead of running ffmpeg.
#[derive(Default)]
pub struct StubEncoder {
    last: Mutex<Option<VideoOptions>>,
}

impl StubEncoder {
    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.last
            .lock()
            .unwrap()
            .map(|options| (options.width, options.height))
    }
}

#[async_trait]
impl VideoEncoder for StubEncoder {
    async fn encode(
        &self,
        _frames: &[PathBuf],
        output: &Path,
        options: VideoOptions,
    ) -> Result<(), AssembleError> {
        *self.last.lock().unwrap() = Some(options);
        tokio::fs::write(output, b"mp4").await?;
        Ok(())
    }
}

pub struct Harness {
    dir: tempfile::TempDir,
    pub t0: DateTime<Utc>,
    pub traces: Arc<TraceRepository>,
    pub summaries: Arc<SummaryRepository>,
    pub daily_repo: Arc<DailySummaryRepository>,
    pub api_log: Arc<ApiRequestRepository>,
    pub settings: Arc<RuntimeSettings>,
    pub state: Arc<PipelineState>,
    pub events: EventBus,
    pub transport: Arc<ScriptedTransport>,
    pub encoder: Arc<StubEncoder>,
    pub scheduler: Arc<SummaryScheduler>,
    pub daily: DailySummarizer,
}

impl Harness {
    /// Recording session that began at local noon on a fixed date.
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_frame_cap(transport, 3600)
    }

    /// Like `new`, with at most `max_frames` frames per video.
    pub fn with_frame_cap(transport: ScriptedTransport, max_frames: u32) -> Self {
        let t0 = Local
            .with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        let state = PipelineState::new();
        state.begin_session(t0);
        state.set_recording(true);
        let mut harness = Self::build(transport, state, max_frames);
        harness.t0 = t0;
        harness
    }

    pub fn with_state(transport: ScriptedTransport, state: PipelineState) -> Self {
        Self::build(transport, state, 3600)
    }

    fn build(transport: ScriptedTransport, state: PipelineState, max_frames: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        let traces = Arc::new(TraceRepository::new(Arc::clone(&db)));
        let summaries = Arc::new(SummaryRepository::new(Arc::clone(&db)));
        let daily_repo = Arc::new(DailySummaryRepository::new(Arc::clone(&db)));
        let api_log = Arc::new(ApiRequestRepository::new(Arc::clone(&db)));

        let settings = Arc::new(
            RuntimeSettings::load(SettingsRepository::new(Arc::clone(&db)), &ClarityConfig::default())
                .unwrap(),
        );
        settings.set_api_key("test-key").unwrap();

        let transport = Arc::new(transport);
        let encoder = Arc::new(StubEncoder::default());
        let assembler = Arc::new(VideoAssembler::new(
            Arc::clone(&traces),
            Arc::clone(&encoder) as Arc<dyn VideoEncoder>,
            dir.path().join("recordings").join("videos"),
            1,
            max_frames,
        ));
        let client = Arc::new(RemoteVisionClient::new(
            Arc::clone(&transport) as Arc<dyn clarity_vision::VisionTransport>,
            Arc::clone(&api_log),
            RemotePolicy {
                upload_attempts: 3,
                backoff_initial: Duration::from_millis(10),
                poll_interval: Duration::from_millis(10),
                poll_timeout: Duration::from_secs(1),
            },
        ));

        let state = Arc::new(state);
        let events = EventBus::new();
        let scheduler = Arc::new(SummaryScheduler::new(
            Arc::clone(&traces),
            Arc::clone(&summaries),
            assembler,
            Arc::clone(&client),
            Arc::clone(&settings),
            Arc::clone(&state),
            events.clone(),
            SummaryPolicy {
                min_frames: 5,
                catch_up_span: 4,
                keep_videos: false,
            },
        ));
        let daily = DailySummarizer::new(
            Arc::clone(&traces),
            Arc::clone(&summaries),
            Arc::clone(&daily_repo),
            client,
            Arc::clone(&settings),
            events.clone(),
        );

        Self {
            dir,
            t0: Utc::now(),
            traces,
            summaries,
            daily_repo,
            api_log,
            settings,
            state,
            events,
            transport,
            encoder,
            scheduler,
            daily,
        }
    }

    /// Append traces at the given second offsets from `t0`.
    pub fn frames(&self, offsets: impl IntoIterator<Item = i64>) {
        for s in offsets {
            let ts = self.t0 + chrono::Duration::seconds(s);
            let path = self.recordings_dir().join(format!("{s}.jpg"));
            self.traces
                .append(ts, &path.to_string_lossy(), 64, 36, 100)
                .unwrap();
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.t0.with_timezone(&Local).date_naive()
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.dir.path().join("recordings")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.recordings_dir().join("videos")
    }
}
