//! Video assembly: a window of traces becomes one short MP4.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use clarity_core::types::{ScreenshotTrace, TimeWindow, VideoResolution};
use clarity_storage::TraceRepository;

use crate::error::AssembleError;

/// Output parameters for one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoOptions {
    pub fn new(resolution: VideoResolution, fps: u32) -> Self {
        let (width, height) = resolution.dimensions();
        Self {
            width,
            height,
            fps: fps.max(1),
        }
    }
}

/// Turns an ordered list of images into a video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(
        &self,
        frames: &[PathBuf],
        output: &Path,
        options: VideoOptions,
    ) -> Result<(), AssembleError>;

    /// Path of the external tool doing the work, if there is one.
    async fn locate(&self) -> Result<Option<PathBuf>, AssembleError> {
        Ok(None)
    }
}

/// `VideoEncoder` that shells out to ffmpeg's concat demuxer.
#[derive(Debug, Default)]
pub struct FfmpegEncoder {
    binary: OnceCell<PathBuf>,
    candidates: Vec<PathBuf>,
}

impl FfmpegEncoder {
    /// Look for `ffmpeg` on PATH, plus the Homebrew locations on macOS.
    pub fn new() -> Self {
        let mut candidates = vec![PathBuf::from("ffmpeg")];
        if cfg!(target_os = "macos") {
            candidates.push(PathBuf::from("/usr/local/bin/ffmpeg"));
            candidates.push(PathBuf::from("/opt/homebrew/bin/ffmpeg"));
        }
        Self {
            binary: OnceCell::new(),
            candidates,
        }
    }

    /// Use an explicit ffmpeg binary.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            binary: OnceCell::new(),
            candidates: vec![path.into()],
        }
    }

    async fn binary(&self) -> Result<&PathBuf, AssembleError> {
        self.binary
            .get_or_try_init(|| async {
                for candidate in &self.candidates {
                    let probe = Command::new(candidate).arg("-version").output().await;
                    if matches!(probe, Ok(ref out) if out.status.success()) {
                        info!(path = %candidate.display(), "Found ffmpeg");
                        return Ok(candidate.clone());
                    }
                }
                Err(AssembleError::Encoding(format!(
                    "ffmpeg not found, tried {:?}",
                    self.candidates
                )))
            })
            .await
    }
}

/// ffmpeg concat list showing each frame for `1/fps` seconds.
///
/// The last file is listed twice so its duration is honoured.
pub fn concat_list(frames: &[PathBuf], fps: u32) -> String {
    let duration = 1.0 / f64::from(fps.max(1));
    let quote = |p: &Path| p.display().to_string().replace('\'', "'\\''");

    let mut list = String::new();
    for frame in frames {
        list.push_str(&format!("file '{}'\nduration {}\n", quote(frame), duration));
    }
    if let Some(last) = frames.last() {
        list.push_str(&format!("file '{}'\n", quote(last)));
    }
    list
}

/// Video filter that letterboxes into the target size.
pub fn scale_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        frames: &[PathBuf],
        output: &Path,
        options: VideoOptions,
    ) -> Result<(), AssembleError> {
        if frames.is_empty() {
            return Err(AssembleError::Encoding("no frames to encode".into()));
        }
        let binary = self.binary().await?;

        let list_path = output.with_extension("txt");
        tokio::fs::write(&list_path, concat_list(frames, options.fps)).await?;

        debug!(frames = frames.len(), output = %output.display(), "Running ffmpeg");
        let result = Command::new(binary)
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .arg("-vf")
            .arg(scale_filter(options.width, options.height))
            .args(["-c:v", "libx264", "-preset", "fast", "-crf", "23"])
            .args(["-pix_fmt", "yuv420p", "-r"])
            .arg(options.fps.to_string())
            .arg("-y")
            .arg(output)
            .output()
            .await;

        let _ = tokio::fs::remove_file(&list_path).await;

        let out = result.map_err(|e| AssembleError::Encoding(format!("failed to run ffmpeg: {}", e)))?;
        if !out.status.success() {
            if let Err(e) = tokio::fs::remove_file(output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %output.display(), error = %e, "Failed to remove partial video");
                }
            }
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(AssembleError::Encoding(format!(
                "ffmpeg exited with {}: {}",
                out.status, tail
            )));
        }
        Ok(())
    }

    async fn locate(&self) -> Result<Option<PathBuf>, AssembleError> {
        self.binary().await.map(|path| Some(path.clone()))
    }
}

/// A video ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledVideo {
    pub path: PathBuf,
    pub frame_count: usize,
    pub window: TimeWindow,
}

/// Loads the traces of a window and encodes them into a video.
pub struct VideoAssembler {
    traces: Arc<TraceRepository>,
    encoder: Arc<dyn VideoEncoder>,
    output_dir: PathBuf,
    fps: u32,
    max_frames: u32,
}

impl VideoAssembler {
    pub fn new(
        traces: Arc<TraceRepository>,
        encoder: Arc<dyn VideoEncoder>,
        output_dir: impl Into<PathBuf>,
        fps: u32,
        max_frames: u32,
    ) -> Self {
        Self {
            traces,
            encoder,
            output_dir: output_dir.into(),
            fps,
            max_frames,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Assemble the traces in `window` into an MP4.
    ///
    /// A window holding more than `max_frames` traces is cut short just
    /// before the first trace that does not fit; the returned
    /// `AssembledVideo::window` is the range actually covered. Fewer than
    /// `min_frames` traces yields `InsufficientFrames` and touches nothing
    /// on disk.
    pub async fn assemble(
        &self,
        window: TimeWindow,
        min_frames: usize,
        resolution: VideoResolution,
    ) -> Result<AssembledVideo, AssembleError> {
        let (window, traces) = self.capped_traces(window)?;
        if traces.len() < min_frames.max(1) {
            return Err(AssembleError::InsufficientFrames {
                found: traces.len(),
                required: min_frames.max(1),
            });
        }

        let frames: Vec<PathBuf> = traces.iter().map(|t| PathBuf::from(&t.file_path)).collect();
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(format!(
            "summary_{}_{}.mp4",
            window.start.format("%Y%m%d_%H%M%S"),
            Utc::now().timestamp_millis()
        ));

        self.encoder
            .encode(&frames, &path, VideoOptions::new(resolution, self.fps))
            .await?;

        info!(
            frames = frames.len(),
            path = %path.display(),
            "Video assembled"
        );
        Ok(AssembledVideo {
            path,
            frame_count: frames.len(),
            window,
        })
    }

    fn capped_traces(
        &self,
        window: TimeWindow,
    ) -> Result<(TimeWindow, Vec<ScreenshotTrace>), AssembleError> {
        let cap = self.max_frames.max(1) as usize;
        let mut traces = self.traces.query(
            Some(window.start),
            Some(window.end),
            Some(cap as u64 + 1),
        )?;
        if traces.len() <= cap {
            return Ok((window, traces));
        }

        let cut = traces[cap].timestamp;
        let capped = if cut > window.start {
            traces.retain(|t| t.timestamp < cut);
            TimeWindow::new(window.start, cut)
        } else {
            // Everything up to the cap shares the first second; take that second whole.
            let end = window.start + Duration::seconds(1);
            traces = self.traces.query(Some(window.start), Some(end), None)?;
            TimeWindow::new(window.start, end)
        };
        debug!(
            start = %window.start,
            planned_end = %window.end,
            end = %capped.end,
            frames = traces.len(),
            "Window capped at max frames"
        );
        Ok((capped, traces))
    }
}
