//! Clarity Capture crate - screen grabbing, frame encoding and the capture loop.
//!
//! Provides the CaptureService capability trait, a MockCaptureService for
//! tests, a WindowsCaptureService backed by Win32 GDI, the JPEG FrameEncoder
//! and the CaptureScheduler that ties them to the trace store.

pub mod encoder;
pub mod scheduler;
pub mod state;
pub mod windows_capture;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clarity_core::error::ClarityError;

pub use encoder::{EncodedFrame, FrameEncoder};
pub use scheduler::CaptureScheduler;
pub use state::PipelineState;
pub use windows_capture::WindowsCaptureService;

/// An uncompressed RGBA screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// How much of a frame actually shows something.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContent {
    /// Share of pixels that are not pure black, in percent.
    pub non_blank_percent: f64,
    /// Distinct colours seen, counted up to `COLOR_SAMPLE_LIMIT`.
    pub unique_colors: usize,
}

impl FrameContent {
    /// A black or near-uniform frame usually means the platform handed back
    /// an empty buffer because screen-recording permission is missing.
    pub fn is_mostly_blank(&self) -> bool {
        self.non_blank_percent < 1.0 || self.unique_colors < 5
    }
}

const COLOR_SAMPLE_LIMIT: usize = 100;

impl RawFrame {
    pub fn content(&self) -> FrameContent {
        let mut non_blank = 0usize;
        let mut colors = HashSet::new();
        let pixels = self.rgba.chunks_exact(4);
        let total = pixels.len();
        for px in pixels {
            let rgb = (px[0], px[1], px[2]);
            if rgb != (0, 0, 0) {
                non_blank += 1;
            }
            if colors.len() < COLOR_SAMPLE_LIMIT {
                colors.insert(rgb);
            }
        }
        FrameContent {
            non_blank_percent: if total == 0 {
                0.0
            } else {
                non_blank as f64 * 100.0 / total as f64
            },
            unique_colors: colors.len(),
        }
    }
}

/// Platform screen-capture capability.
#[async_trait]
pub trait CaptureService: Send + Sync {
    /// Check that capturing is possible at all (permission, a display).
    ///
    /// Called once before recording starts; an error aborts the start.
    async fn probe(&self) -> Result<(), ClarityError>;

    /// Capture the current screen.
    async fn capture_frame(&self) -> Result<RawFrame, ClarityError>;
}

/// Mock capture service for testing.
///
/// Produces small gradient frames; can be told to deny permission or to fail
/// periodically.
#[derive(Debug)]
pub struct MockCaptureService {
    width: u32,
    height: u32,
    permitted: bool,
    always_fail: bool,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl MockCaptureService {
    pub fn new() -> Self {
        Self {
            width: 64,
            height: 36,
            permitted: true,
            always_fail: false,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Probe fails as if screen-recording permission were denied.
    pub fn without_permission() -> Self {
        Self {
            permitted: false,
            ..Self::new()
        }
    }

    /// Every capture fails.
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new()
        }
    }

    /// Every `n`-th capture fails.
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Number of capture attempts so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCaptureService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureService for MockCaptureService {
    async fn probe(&self) -> Result<(), ClarityError> {
        if self.permitted {
            Ok(())
        } else {
            Err(ClarityError::Capture("Screen recording permission denied".into()))
        }
    }

    async fn capture_frame(&self) -> Result<RawFrame, ClarityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail || self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(ClarityError::Capture(format!("mock capture {} failed", call)));
        }

        let shade = (call % 256) as u8;
        let rgba = (0..self.width as usize * self.height as usize)
            .flat_map(|i| [shade, (i % 251) as u8, 128, 255])
            .collect();
        Ok(RawFrame {
            rgba,
            width: self.width,
            height: self.height,
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_capture_service() {
        let service = MockCaptureService::new();
        service.probe().await.unwrap();
        let frame = service.capture_frame().await.unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 36);
        assert_eq!(frame.rgba.len(), 64 * 36 * 4);
        assert!(!frame.content().is_mostly_blank());
    }

    #[tokio::test]
    async fn test_mock_custom_size() {
        let service = MockCaptureService::new().with_size(4, 2);
        let frame = service.capture_frame().await.unwrap();
        assert_eq!(frame.rgba.len(), 4 * 2 * 4);
    }

    #[tokio::test]
    async fn test_mock_without_permission() {
        let service = MockCaptureService::without_permission();
        assert!(service.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_fail_every() {
        let service = MockCaptureService::new().fail_every(2);
        assert!(service.capture_frame().await.is_ok());
        assert!(service.capture_frame().await.is_err());
        assert!(service.capture_frame().await.is_ok());
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let service = MockCaptureService::failing();
        assert!(service.capture_frame().await.is_err());
    }

    fn raw(rgba: Vec<u8>, width: u32, height: u32) -> RawFrame {
        RawFrame {
            rgba,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_black_frame_is_blank() {
        let content = raw(vec![0, 0, 0, 255].repeat(16), 4, 4).content();
        assert_eq!(content.non_blank_percent, 0.0);
        assert_eq!(content.unique_colors, 1);
        assert!(content.is_mostly_blank());
    }

    #[test]
    fn test_varied_frame_has_content() {
        let rgba: Vec<u8> = (0..16u8).flat_map(|i| [i * 10, 255 - i, 7, 255]).collect();
        let content = raw(rgba, 4, 4).content();
        assert_eq!(content.non_blank_percent, 100.0);
        assert_eq!(content.unique_colors, 16);
        assert!(!content.is_mostly_blank());
    }

    #[test]
    fn test_uniform_color_counts_as_blank() {
        // Non-black but a single colour, as some platforms return without permission.
        let content = raw(vec![30, 30, 30, 255].repeat(16), 4, 4).content();
        assert_eq!(content.non_blank_percent, 100.0);
        assert!(content.is_mostly_blank());
    }
}
