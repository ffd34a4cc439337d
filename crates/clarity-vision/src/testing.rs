//! Scripted `VisionTransport` for tests in this and dependent crates.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use clarity_core::types::TokenUsage;

use crate::error::TransportError;
use crate::transport::{FileState, GenerateRequest, Generation, RemoteFile, VisionTransport};

/// Transport that answers from a fixed script.
///
/// By default uploads succeed with an already active file and generation
/// returns `"summary text"`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    upload_failures: u32,
    processing_polls: u32,
    file_fails: bool,
    generate_error: Option<TransportError>,
    reply: Option<String>,
    uploads: AtomicU32,
    polls: AtomicU32,
    generates: AtomicU32,
    last_generate: Mutex<Option<GenerateRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` uploads with HTTP 503.
    pub fn upload_failures(mut self, n: u32) -> Self {
        self.upload_failures = n;
        self
    }

    /// Report `PROCESSING` until the `n`th poll.
    pub fn processing_polls(mut self, n: u32) -> Self {
        self.processing_polls = n;
        self
    }

    /// Uploaded file ends in `FAILED`.
    pub fn file_fails(mut self) -> Self {
        self.file_fails = true;
        self
    }

    pub fn generate_error(mut self, err: TransportError) -> Self {
        self.generate_error = Some(err);
        self
    }

    pub fn reply(mut self, text: impl Into<String>) -> Self {
        self.reply = Some(text.into());
        self
    }

    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn generates(&self) -> u32 {
        self.generates.load(Ordering::SeqCst)
    }

    pub fn last_generate(&self) -> Option<GenerateRequest> {
        self.last_generate.lock().ok().and_then(|g| g.clone())
    }

    fn file(&self, state: FileState) -> RemoteFile {
        RemoteFile {
            name: "files/scripted".into(),
            uri: "https://files.example/scripted".into(),
            mime_type: "video/mp4".into(),
            state,
        }
    }
}

#[async_trait]
impl VisionTransport for ScriptedTransport {
    async fn upload(&self, _api_key: &str, _path: &Path) -> Result<RemoteFile, TransportError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.upload_failures {
            return Err(TransportError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        let state = if self.file_fails {
            FileState::Failed
        } else if self.processing_polls == 0 {
            FileState::Active
        } else {
            FileState::Processing
        };
        Ok(self.file(state))
    }

    async fn get_file(&self, _api_key: &str, _name: &str) -> Result<RemoteFile, TransportError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let state = if n >= self.processing_polls {
            FileState::Active
        } else {
            FileState::Processing
        };
        Ok(self.file(state))
    }

    async fn generate(
        &self,
        _api_key: &str,
        request: &GenerateRequest,
    ) -> Result<Generation, TransportError> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_generate.lock() {
            *last = Some(request.clone());
        }
        if let Some(err) = &self.generate_error {
            return Err(err.clone());
        }
        Ok(Generation {
            text: self.reply.clone().unwrap_or_else(|| "summary text".into()),
            usage: TokenUsage {
                prompt_tokens: Some(120),
                completion_tokens: Some(30),
                total_tokens: Some(150),
            },
        })
    }
}
