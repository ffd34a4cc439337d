//! Real Windows screen capture via Win32 GDI APIs.
//!
//! On Windows, grabs the primary monitor with BitBlt into a 32-bit top-down
//! DIB and converts it to RGBA. On other platforms every call returns
//! `ClarityError::Capture`.

use async_trait::async_trait;
#[cfg(target_os = "windows")]
use chrono::Utc;
#[cfg(not(target_os = "windows"))]
use tracing::warn;

use clarity_core::error::ClarityError;

use crate::{CaptureService, RawFrame};

/// Primary-monitor capture using Win32 GDI.
#[derive(Debug, Default, Clone)]
pub struct WindowsCaptureService;

impl WindowsCaptureService {
    pub fn new() -> Self {
        Self
    }
}

// =============================================================================
// Windows implementation
// =============================================================================

#[cfg(target_os = "windows")]
#[async_trait]
impl CaptureService for WindowsCaptureService {
    async fn probe(&self) -> Result<(), ClarityError> {
        tokio::task::spawn_blocking(|| unsafe { screen_size() })
            .await
            .map_err(|e| ClarityError::Capture(format!("probe task failed: {}", e)))?
            .map(|_| ())
    }

    async fn capture_frame(&self) -> Result<RawFrame, ClarityError> {
        let captured_at = Utc::now();
        let (rgba, width, height) = tokio::task::spawn_blocking(|| unsafe { capture_screen() })
            .await
            .map_err(|e| ClarityError::Capture(format!("capture task failed: {}", e)))??;
        Ok(RawFrame {
            rgba,
            width,
            height,
            captured_at,
        })
    }
}

#[cfg(target_os = "windows")]
unsafe fn screen_size() -> Result<(i32, i32), ClarityError> {
    use windows_sys::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

    let width = GetSystemMetrics(SM_CXSCREEN);
    let height = GetSystemMetrics(SM_CYSCREEN);
    if width <= 0 || height <= 0 {
        return Err(ClarityError::Capture("No active display found".into()));
    }
    Ok((width, height))
}

#[cfg(target_os = "windows")]
unsafe fn capture_screen() -> Result<(Vec<u8>, u32, u32), ClarityError> {
    use windows_sys::Win32::Graphics::Gdi::*;

    let (width, height) = screen_size()?;

    let hdc_screen = GetDC(0);
    if hdc_screen == 0 {
        return Err(ClarityError::Capture("Failed to get screen DC".into()));
    }

    let hdc_mem = CreateCompatibleDC(hdc_screen);
    let hbm = CreateCompatibleBitmap(hdc_screen, width, height);
    let old_bm = SelectObject(hdc_mem, hbm);

    let release = || {
        SelectObject(hdc_mem, old_bm);
        DeleteObject(hbm);
        DeleteDC(hdc_mem);
        ReleaseDC(0, hdc_screen);
    };

    if BitBlt(hdc_mem, 0, 0, width, height, hdc_screen, 0, 0, SRCCOPY) == 0 {
        release();
        return Err(ClarityError::Capture("BitBlt failed".into()));
    }

    // 32-bit top-down DIB: rows are tightly packed BGRA.
    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    let mut bih = vec![0u8; 40];
    bih[0..4].copy_from_slice(&40u32.to_le_bytes());
    bih[4..8].copy_from_slice(&width.to_le_bytes());
    bih[8..12].copy_from_slice(&(-height).to_le_bytes());
    bih[12..14].copy_from_slice(&1u16.to_le_bytes());
    bih[14..16].copy_from_slice(&32u16.to_le_bytes());

    let lines = GetDIBits(
        hdc_mem,
        hbm,
        0,
        height as u32,
        pixels.as_mut_ptr() as *mut _,
        bih.as_mut_ptr() as *mut _,
        DIB_RGB_COLORS,
    );
    release();

    if lines == 0 {
        return Err(ClarityError::Capture("GetDIBits failed".into()));
    }

    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
        px[3] = 255;
    }

    Ok((pixels, width as u32, height as u32))
}

// =============================================================================
// Non-Windows stub
// =============================================================================

#[cfg(not(target_os = "windows"))]
#[async_trait]
impl CaptureService for WindowsCaptureService {
    async fn probe(&self) -> Result<(), ClarityError> {
        Err(ClarityError::Capture(
            "Windows screen capture is only available on Windows".into(),
        ))
    }

    async fn capture_frame(&self) -> Result<RawFrame, ClarityError> {
        warn!("WindowsCaptureService called on non-Windows platform");
        Err(ClarityError::Capture(
            "Windows screen capture is only available on Windows".into(),
        ))
    }
}
