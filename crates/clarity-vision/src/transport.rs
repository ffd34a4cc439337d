//! The request/response seam between the call state machine and HTTP.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use clarity_core::types::TokenUsage;

use crate::error::TransportError;

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

/// A file held by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc123`.
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub state: FileState,
}

/// Reference to an uploaded file inside a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub uri: String,
    pub mime_type: String,
    /// `mediaResolution.level` value.
    pub media_resolution: &'static str,
}

/// One `generateContent` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub file: Option<FileRef>,
}

/// Text and token usage of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Transport to a vision-capable generation service.
#[async_trait]
pub trait VisionTransport: Send + Sync {
    async fn upload(&self, api_key: &str, path: &Path) -> Result<RemoteFile, TransportError>;

    async fn get_file(&self, api_key: &str, name: &str) -> Result<RemoteFile, TransportError>;

    async fn generate(
        &self,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<Generation, TransportError>;
}
