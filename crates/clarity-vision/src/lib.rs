//! Clarity Vision - turns windows of screenshots into remote summaries.
//!
//! Video assembly shells out to ffmpeg; summarization talks to the Gemini
//! File API and `generateContent` through the [`VisionTransport`] seam.

pub mod client;
pub mod error;
pub mod gemini;
pub mod testing;
pub mod transport;
pub mod video;

pub use client::{CallState, RemoteCall, RemotePolicy, RemoteVisionClient, VideoCall};
pub use error::{AssembleError, TransportError};
pub use gemini::{GeminiTransport, DEFAULT_BASE_URL};
pub use transport::{FileRef, FileState, GenerateRequest, Generation, RemoteFile, VisionTransport};
pub use video::{AssembledVideo, FfmpegEncoder, VideoAssembler, VideoEncoder, VideoOptions};
