//! Periodic window summarization.
//!
//! Every interval the scheduler plans a window after the cursor, assembles
//! its frames into a video and asks the remote service to describe it. The
//! cursor only advances once a summary has been stored.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clarity_capture::PipelineState;
use clarity_core::config::SummaryConfig;
use clarity_core::error::{ClarityError, RemoteFailure};
use clarity_core::events::EventBus;
use clarity_core::types::{Summary, TimeWindow};
use clarity_storage::{SummaryRepository, TraceRepository};
use clarity_vision::{AssembleError, RemoteVisionClient, VideoAssembler, VideoCall};

use crate::planner::{plan_window, PlanParams, WindowPlan};
use crate::settings::RuntimeSettings;

/// Static knobs of the summary loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPolicy {
    pub min_frames: u32,
    pub catch_up_span: u32,
    pub keep_videos: bool,
}

impl From<&SummaryConfig> for SummaryPolicy {
    fn from(config: &SummaryConfig) -> Self {
        Self {
            min_frames: config.min_frames.max(1),
            catch_up_span: config.catch_up_span.max(1),
            keep_videos: config.keep_videos,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Recording is off.
    Idle,
    MissingApiKey,
    NotReady { start: DateTime<Utc> },
    InsufficientFrames {
        window: TimeWindow,
        found: usize,
        required: usize,
    },
    Summarized(Summary),
    RemoteFailed {
        window: TimeWindow,
        failure: RemoteFailure,
    },
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct SummaryCycle {
    traces: Arc<TraceRepository>,
    summaries: Arc<SummaryRepository>,
    assembler: Arc<VideoAssembler>,
    client: Arc<RemoteVisionClient>,
    settings: Arc<RuntimeSettings>,
    state: Arc<PipelineState>,
    events: EventBus,
    policy: SummaryPolicy,
}

impl SummaryCycle {
    async fn run(&self, now: DateTime<Utc>) -> Result<CycleOutcome, ClarityError> {
        if !self.state.is_recording() {
            return Ok(CycleOutcome::Idle);
        }

        let settings = self.settings.snapshot();
        let Some(api_key) = settings.api_key.clone() else {
            warn!("Gemini API key is not configured, skipping summary cycle");
            return Ok(CycleOutcome::MissingApiKey);
        };

        let Some(cursor) = self.state.cursor().or_else(|| self.state.session_start()) else {
            return Ok(CycleOutcome::Idle);
        };

        let plan = plan_window(
            &self.traces,
            PlanParams {
                cursor,
                now,
                interval_seconds: settings.summary_interval_seconds,
                catch_up_span: self.policy.catch_up_span,
                min_frames: self.policy.min_frames,
            },
        )?;
        let window = match plan {
            WindowPlan::NotReady { start } => {
                debug!(%start, "Window not ready");
                return Ok(CycleOutcome::NotReady { start });
            }
            WindowPlan::Ready(window) => window,
        };

        let video = match self
            .assembler
            .assemble(
                window,
                self.policy.min_frames as usize,
                settings.video_resolution,
            )
            .await
        {
            Ok(video) => video,
            Err(AssembleError::InsufficientFrames { found, required }) => {
                debug!(
                    start = %window.start,
                    end = %window.end,
                    found,
                    required,
                    "Not enough frames, retrying window later"
                );
                return Ok(CycleOutcome::InsufficientFrames {
                    window,
                    found,
                    required,
                });
            }
            Err(e) => return Err(e.into()),
        };
        // The assembler may end the window early to stay within the frame cap.
        let window = video.window;

        info!(
            start = %window.start,
            end = %window.end,
            frames = video.frame_count,
            "Summarizing window"
        );
        let result = self
            .client
            .summarize_video(VideoCall {
                api_key,
                model: settings.model.clone(),
                prompt: settings.active_prompt().to_string(),
                video: video.path.clone(),
                resolution: settings.video_resolution,
            })
            .await;

        if !self.policy.keep_videos {
            if let Err(e) = tokio::fs::remove_file(&video.path).await {
                warn!(path = %video.path.display(), error = %e, "Failed to remove video");
            }
        }

        let outcome = match result {
            Ok(generation) => {
                let summary = self.summaries.insert(
                    window,
                    &generation.text,
                    u32::try_from(video.frame_count).unwrap_or(u32::MAX),
                )?;
                self.state.advance_cursor(window.end);
                info!(id = summary.id, end = %window.end, "Summary stored");
                CycleOutcome::Summarized(summary)
            }
            Err(failure) => {
                warn!(
                    start = %window.start,
                    kind = failure.kind_code(),
                    error = %failure,
                    "Window summary failed"
                );
                CycleOutcome::RemoteFailed { window, failure }
            }
        };
        self.events.notify_statistics_changed();
        Ok(outcome)
    }
}

/// Owns the summary loop.
pub struct SummaryScheduler {
    cycle: SummaryCycle,
    worker: Mutex<Option<Worker>>,
}

impl SummaryScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        traces: Arc<TraceRepository>,
        summaries: Arc<SummaryRepository>,
        assembler: Arc<VideoAssembler>,
        client: Arc<RemoteVisionClient>,
        settings: Arc<RuntimeSettings>,
        state: Arc<PipelineState>,
        events: EventBus,
        policy: SummaryPolicy,
    ) -> Self {
        Self {
            cycle: SummaryCycle {
                traces,
                summaries,
                assembler,
                client,
                settings,
                state,
                events,
                policy,
            },
            worker: Mutex::new(None),
        }
    }

    /// Run one cycle against `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, ClarityError> {
        self.cycle.run(now).await
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Spawn the loop. The first cycle runs one full interval from now.
    pub async fn start(&self) -> Result<(), ClarityError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(ClarityError::Conflict("Summary loop is already running".into()));
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(summary_loop(self.cycle.clone(), cancel.clone()));
        *worker = Some(Worker { handle, cancel });
        info!(
            interval_secs = self.cycle.settings.summary_interval_seconds(),
            "Summary loop started"
        );
        Ok(())
    }

    /// Stop the loop after any in-flight cycle completes.
    pub async fn stop(&self) -> Result<(), ClarityError> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Err(ClarityError::Conflict("Summary loop is not running".into()));
        };
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Summary loop terminated abnormally");
        }
        info!("Summary loop stopped");
        Ok(())
    }
}

fn summary_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn summary_loop(cycle: SummaryCycle, cancel: CancellationToken) {
    let mut period = Duration::from_secs(cycle.settings.summary_interval_seconds());
    let mut ticker = summary_ticker(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match cycle.run(Utc::now()).await {
                    Ok(outcome) => debug!(?outcome, "Summary cycle finished"),
                    Err(e) => error!(error = %e, "Summary cycle failed"),
                }

                let current = Duration::from_secs(cycle.settings.summary_interval_seconds());
                if current != period {
                    info!(
                        old_secs = period.as_secs(),
                        new_secs = current.as_secs(),
                        "Summary interval changed"
                    );
                    period = current;
                    ticker = summary_ticker(period);
                }
            }
        }
    }
    debug!("Summary loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Duration as ChronoDuration;
    use clarity_vision::testing::ScriptedTransport;
    use clarity_vision::TransportError;

    fn secs(h: &Harness, s: i64) -> DateTime<Utc> {
        h.t0 + ChronoDuration::seconds(s)
    }

    #[tokio::test]
    async fn test_idle_when_not_recording() {
        let h = Harness::new(ScriptedTransport::new());
        h.state.set_recording(false);
        let outcome = h.scheduler.run_cycle(secs(&h, 100)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_missing_api_key_skips() {
        let h = Harness::new(ScriptedTransport::new());
        h.settings.set_api_key("").unwrap();
        h.frames(0..60);
        let outcome = h.scheduler.run_cycle(secs(&h, 100)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::MissingApiKey);
        assert_eq!(h.summaries.count().unwrap(), 0);
        assert_eq!(h.api_log.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_frames_then_retry_same_start() {
        let h = Harness::new(ScriptedTransport::new());
        h.frames([0, 1]);

        let outcome = h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();
        let CycleOutcome::InsufficientFrames { window, found, required } = outcome else {
            panic!("expected insufficient frames, got {outcome:?}");
        };
        assert_eq!((found, required), (2, 5));
        assert_eq!(window.start, h.t0);
        assert_eq!(h.summaries.count().unwrap(), 0);
        assert_eq!(h.api_log.count().unwrap(), 0);
        assert_eq!(h.state.cursor(), None);
        assert_eq!(h.transport.uploads(), 0);

        h.frames(2..40);
        let outcome = h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();
        let CycleOutcome::Summarized(summary) = outcome else {
            panic!("expected a summary, got {outcome:?}");
        };
        assert_eq!(summary.start_time, h.t0);
        assert_eq!(summary.screenshot_count, 40);
    }

    #[tokio::test]
    async fn test_two_cycles_adjacent_windows() {
        let h = Harness::new(ScriptedTransport::new());
        h.frames(0..90);

        let first = h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();
        let second = h.scheduler.run_cycle(secs(&h, 95)).await.unwrap();
        let (CycleOutcome::Summarized(a), CycleOutcome::Summarized(b)) = (first, second) else {
            panic!("expected two summaries");
        };
        assert_eq!((a.start_time, a.end_time), (secs(&h, 0), secs(&h, 45)));
        assert_eq!((b.start_time, b.end_time), (secs(&h, 45), secs(&h, 90)));
        assert_eq!(a.screenshot_count, 45);
        assert_eq!(h.state.cursor(), Some(secs(&h, 90)));

        let stored = h.summaries.query(None, None, None).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].end_time <= stored[1].start_time);
        assert_eq!(h.api_log.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_not_ready_until_interval_elapsed() {
        let h = Harness::new(ScriptedTransport::new());
        h.frames(0..30);
        let outcome = h.scheduler.run_cycle(secs(&h, 30)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NotReady { start: h.t0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_keeps_cursor() {
        let h = Harness::new(ScriptedTransport::new().upload_failures(10));
        h.frames(0..60);

        let outcome = h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();
        let CycleOutcome::RemoteFailed { failure, .. } = outcome else {
            panic!("expected a remote failure, got {outcome:?}");
        };
        assert_eq!(failure.kind_code(), "UploadFailure");
        assert_eq!(h.state.cursor(), None);
        assert_eq!(h.summaries.count().unwrap(), 0);

        let rows = h.api_log.query(None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].request.success);
        assert_eq!(rows[0].request.error_kind.as_deref(), Some("UploadFailure"));
    }

    #[tokio::test]
    async fn test_generation_failure_notifies() {
        let h = Harness::new(ScriptedTransport::new().generate_error(TransportError::Status {
            status: 500,
            body: "boom".into(),
        }));
        h.frames(0..60);
        let before = h.events.generation();

        let outcome = h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::RemoteFailed { .. }));
        assert!(h.events.generation() > before);
    }

    #[tokio::test]
    async fn test_video_removed_after_call() {
        let h = Harness::new(ScriptedTransport::new());
        h.frames(0..60);
        h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();

        let videos: Vec<_> = std::fs::read_dir(h.video_dir())
            .map(|rd| rd.collect())
            .unwrap_or_default();
        assert!(videos.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_and_resolution_follow_settings() {
        let h = Harness::new(ScriptedTransport::new());
        h.settings.set_language(clarity_core::types::Language::En).unwrap();
        h.settings
            .set_video_resolution(clarity_core::types::VideoResolution::Default)
            .unwrap();
        h.frames(0..60);
        h.scheduler.run_cycle(secs(&h, 50)).await.unwrap();

        let sent = h.transport.last_generate().unwrap();
        assert!(sent.prompt.starts_with("Analyze this screen activity video"));
        assert_eq!(sent.file.unwrap().media_resolution, "MEDIA_RESOLUTION_DEFAULT");
        assert_eq!(h.encoder.last_size(), Some((1280, 720)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_waits_full_interval_before_first_cycle() {
        let h = Harness::new(ScriptedTransport::new());
        h.settings.set_summary_interval_seconds(10).unwrap();
        h.scheduler.start().await.unwrap();
        assert!(h.scheduler.start().await.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.transport.uploads(), 0);

        h.scheduler.stop().await.unwrap();
        assert!(!h.scheduler.is_running().await);
        assert!(matches!(
            h.scheduler.stop().await,
            Err(ClarityError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_capped_window_leaves_rest_for_next_cycle() {
        let h = Harness::with_frame_cap(ScriptedTransport::new(), 20);
        h.frames(0..90);

        let first = h.scheduler.run_cycle(secs(&h, 95)).await.unwrap();
        let CycleOutcome::Summarized(a) = first else {
            panic!("expected a summary, got {first:?}");
        };
        assert_eq!((a.start_time, a.end_time), (secs(&h, 0), secs(&h, 20)));
        assert_eq!(a.screenshot_count, 20);
        assert_eq!(h.state.cursor(), Some(secs(&h, 20)));

        // The remaining frames are picked up from the new cursor.
        let second = h.scheduler.run_cycle(secs(&h, 95)).await.unwrap();
        let CycleOutcome::Summarized(b) = second else {
            panic!("expected a summary, got {second:?}");
        };
        assert_eq!((b.start_time, b.end_time), (secs(&h, 20), secs(&h, 40)));

        let covered: u32 = h
            .summaries
            .query(None, None, None)
            .unwrap()
            .iter()
            .map(|s| s.screenshot_count)
            .sum();
        let in_windows = h.traces.count_between(secs(&h, 0), secs(&h, 40)).unwrap();
        assert_eq!(u64::from(covered), in_windows);
    }
}
