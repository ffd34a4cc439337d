//! JPEG encoding of raw frames into the date-partitioned recordings tree.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use tracing::debug;

use clarity_core::error::ClarityError;

use crate::RawFrame;

/// Collision suffixes tried before giving up on a file name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A frame written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
}

/// Encodes RGBA frames as JPEG under `<root>/<YYYY-MM-DD>/`.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    root: PathBuf,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(root: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            root: root.into(),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encode `frame` and persist it.
    ///
    /// The file is named after the local capture time and `seq`. An existing
    /// file is never overwritten: `_1`, `_2`, ... is appended instead. The
    /// pixel buffer is consumed rather than copied.
    pub fn encode(&self, frame: RawFrame, seq: u64) -> Result<EncodedFrame, ClarityError> {
        let RawFrame {
            rgba,
            width,
            height,
            captured_at,
        } = frame;
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(ClarityError::Encoding(format!(
                "frame buffer is {} bytes, expected {} for {}x{} RGBA",
                rgba.len(),
                expected,
                width,
                height
            )));
        }

        let rgba = RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| ClarityError::Encoding("frame buffer does not match size".into()))?;
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode_image(&rgb)
            .map_err(|e| ClarityError::Encoding(format!("JPEG encoding failed: {}", e)))?;

        let local = captured_at.with_timezone(&Local);
        let date = local.format("%Y-%m-%d").to_string();
        let dir = self.root.join(&date);
        std::fs::create_dir_all(&dir)?;

        let stem = format!("{}_{}_{:06}", date, local.format("%H-%M-%S"), seq);
        let path = write_new_file(&dir, &stem, &bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "Frame encoded");

        Ok(EncodedFrame {
            path,
            width,
            height,
            file_size: bytes.len() as u64,
        })
    }
}

fn write_new_file(dir: &Path, stem: &str, bytes: &[u8]) -> Result<PathBuf, ClarityError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{}.jpg", stem)
        } else {
            format!("{}_{}.jpg", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)?;
                file.sync_data()?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ClarityError::Encoding(format!(
        "no free file name for {} in {}",
        stem,
        dir.display()
    )))
}
