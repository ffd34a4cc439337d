//! Remote vision call: upload, wait for processing, generate.
//!
//! A call is an explicit state machine. [`RemoteCall::step`] performs one
//! transition; [`RemoteVisionClient::summarize_video`] drives a call to a
//! terminal state and writes exactly one request log row for it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use clarity_core::config::RemoteConfig;
use clarity_core::error::RemoteFailure;
use clarity_core::types::{NewApiRequest, TokenUsage, VideoResolution};
use clarity_storage::ApiRequestRepository;

use crate::error::TransportError;
use crate::transport::{FileRef, FileState, GenerateRequest, Generation, RemoteFile, VisionTransport};

const VIDEO_MIME: &str = "video/mp4";

/// Retry and polling limits for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemotePolicy {
    pub upload_attempts: u32,
    pub backoff_initial: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl RemotePolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.backoff_initial,
            current_interval: self.backoff_initial,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_interval: self.backoff_initial.saturating_mul(16),
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

impl Default for RemotePolicy {
    fn default() -> Self {
        Self::from(&RemoteConfig::default())
    }
}

impl From<&RemoteConfig> for RemotePolicy {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            upload_attempts: config.upload_attempts.max(1),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        }
    }
}

/// Inputs of one video summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCall {
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub video: PathBuf,
    pub resolution: VideoResolution,
}

/// Lifecycle of a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Created,
    Uploading { attempt: u32 },
    Uploaded(RemoteFile),
    Processing { file: RemoteFile, since: Instant },
    Active(RemoteFile),
    Summarizing(RemoteFile),
    Done(Generation),
    Failed(RemoteFailure),
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Done(_) | CallState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Created => "created",
            CallState::Uploading { .. } => "uploading",
            CallState::Uploaded(_) => "uploaded",
            CallState::Processing { .. } => "processing",
            CallState::Active(_) => "active",
            CallState::Summarizing(_) => "summarizing",
            CallState::Done(_) => "done",
            CallState::Failed(_) => "failed",
        }
    }
}

/// One in-flight call and everything its transitions need.
pub struct RemoteCall<'a> {
    transport: &'a dyn VisionTransport,
    policy: RemotePolicy,
    request: VideoCall,
    state: CallState,
    backoff: ExponentialBackoff,
    endpoint: &'static str,
    last_status: Option<u16>,
}

impl<'a> RemoteCall<'a> {
    pub fn new(transport: &'a dyn VisionTransport, policy: RemotePolicy, request: VideoCall) -> Self {
        Self {
            transport,
            backoff: policy.backoff(),
            policy,
            request,
            state: CallState::Created,
            endpoint: "files.upload",
            last_status: None,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Perform exactly one transition. No-op once terminal.
    pub async fn step(&mut self) {
        let current = std::mem::replace(&mut self.state, CallState::Created);
        let next = match current {
            CallState::Created => CallState::Uploading { attempt: 1 },
            CallState::Uploading { attempt } => self.upload(attempt).await,
            CallState::Uploaded(file) => CallState::Processing {
                file,
                since: Instant::now(),
            },
            CallState::Processing { file, since } => self.poll(file, since).await,
            CallState::Active(file) => CallState::Summarizing(file),
            CallState::Summarizing(file) => self.generate(file).await,
            terminal => terminal,
        };
        debug!(state = next.name(), "Remote call transition");
        self.state = next;
    }

    /// Step until a terminal state is reached.
    pub async fn run(&mut self) {
        while !self.state.is_terminal() {
            self.step().await;
        }
    }

    async fn upload(&mut self, attempt: u32) -> CallState {
        self.endpoint = "files.upload";
        match self
            .transport
            .upload(&self.request.api_key, &self.request.video)
            .await
        {
            Ok(file) => {
                self.last_status = Some(200);
                info!(name = %file.name, attempt, "Video uploaded");
                CallState::Uploaded(file)
            }
            Err(e) => {
                self.last_status = e.status();
                if attempt >= self.policy.upload_attempts {
                    return CallState::Failed(RemoteFailure::Upload {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                let delay = self.backoff.next_backoff().unwrap_or(self.policy.backoff_initial);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
                CallState::Uploading {
                    attempt: attempt + 1,
                }
            }
        }
    }

    async fn poll(&mut self, file: RemoteFile, since: Instant) -> CallState {
        self.endpoint = "files.get";
        match file.state {
            FileState::Active => return CallState::Active(file),
            FileState::Failed => {
                return CallState::Failed(RemoteFailure::Processing(format!(
                    "{} reported FAILED",
                    file.name
                )))
            }
            FileState::Processing | FileState::StateUnspecified | FileState::Unknown => {}
        }

        let waited = since.elapsed();
        if waited >= self.policy.poll_timeout {
            return CallState::Failed(RemoteFailure::ProcessingTimeout {
                waited_ms: waited.as_millis() as u64,
            });
        }

        tokio::time::sleep(self.policy.poll_interval).await;
        match self.transport.get_file(&self.request.api_key, &file.name).await {
            Ok(updated) => {
                self.last_status = Some(200);
                CallState::Processing {
                    file: updated,
                    since,
                }
            }
            Err(e) => {
                self.last_status = e.status();
                CallState::Failed(RemoteFailure::Processing(e.to_string()))
            }
        }
    }

    async fn generate(&mut self, file: RemoteFile) -> CallState {
        self.endpoint = "generateContent";
        let mime_type = if file.mime_type.is_empty() {
            VIDEO_MIME.to_string()
        } else {
            file.mime_type
        };
        let request = GenerateRequest {
            model: self.request.model.clone(),
            prompt: self.request.prompt.clone(),
            file: Some(FileRef {
                uri: file.uri,
                mime_type,
                media_resolution: self.request.resolution.media_resolution(),
            }),
        };
        match self.transport.generate(&self.request.api_key, &request).await {
            Ok(generation) => {
                self.last_status = Some(200);
                CallState::Done(generation)
            }
            Err(e) => {
                self.last_status = e.status();
                CallState::Failed(generation_failure(e))
            }
        }
    }
}

fn generation_failure(err: TransportError) -> RemoteFailure {
    RemoteFailure::Generation {
        kind: err.generation_kind(),
        status: err.status(),
        message: err.to_string(),
    }
}

/// Drives remote calls and records their outcomes.
pub struct RemoteVisionClient {
    transport: Arc<dyn VisionTransport>,
    log: Arc<ApiRequestRepository>,
    policy: RemotePolicy,
}

impl RemoteVisionClient {
    pub fn new(
        transport: Arc<dyn VisionTransport>,
        log: Arc<ApiRequestRepository>,
        policy: RemotePolicy,
    ) -> Self {
        Self {
            transport,
            log,
            policy,
        }
    }

    /// Summarize a video. Always runs to a terminal state.
    pub async fn summarize_video(&self, request: VideoCall) -> Result<Generation, RemoteFailure> {
        let started = Instant::now();
        let model = request.model.clone();
        let mut call = RemoteCall::new(self.transport.as_ref(), self.policy, request);
        call.run().await;

        let outcome = match call.state {
            CallState::Done(generation) => Ok(generation),
            CallState::Failed(failure) => Err(failure),
            other => Err(RemoteFailure::Processing(format!(
                "call stopped in non-terminal state {}",
                other.name()
            ))),
        };
        self.record(&model, call.endpoint, call.last_status, started, &outcome);
        outcome
    }

    /// Text-only generation. One request, one log row.
    pub async fn generate_text(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<Generation, RemoteFailure> {
        let started = Instant::now();
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            file: None,
        };
        let (outcome, status) = match self.transport.generate(api_key, &request).await {
            Ok(generation) => (Ok(generation), Some(200)),
            Err(e) => {
                let status = e.status();
                (Err(generation_failure(e)), status)
            }
        };
        self.record(model, "generateContent", status, started, &outcome);
        outcome
    }

    fn record(
        &self,
        model: &str,
        endpoint: &str,
        status_code: Option<u16>,
        started: Instant,
        outcome: &Result<Generation, RemoteFailure>,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        let entry = match outcome {
            Ok(generation) => NewApiRequest {
                timestamp: Utc::now(),
                model: model.to_string(),
                endpoint: endpoint.to_string(),
                usage: generation.usage,
                status_code,
                duration_ms,
                success: true,
                error_kind: None,
                error_message: None,
            },
            Err(failure) => NewApiRequest {
                timestamp: Utc::now(),
                model: model.to_string(),
                endpoint: endpoint.to_string(),
                usage: TokenUsage::default(),
                status_code: failure.status_code().or(status_code),
                duration_ms,
                success: false,
                error_kind: Some(failure.kind_code().to_string()),
                error_message: Some(failure.to_string()),
            },
        };

        match outcome {
            Ok(_) => info!(model, endpoint, duration_ms, "Remote call succeeded"),
            Err(failure) => warn!(
                model,
                endpoint,
                duration_ms,
                kind = failure.kind_code(),
                error = %failure,
                "Remote call failed"
            ),
        }

        if let Err(e) = self.log.insert(&entry) {
            warn!(error = %e, "Failed to write api request log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use clarity_core::error::GenerationFailureKind;
    use clarity_storage::Database;

    fn policy() -> RemotePolicy {
        RemotePolicy {
            upload_attempts: 3,
            backoff_initial: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1000),
            poll_timeout: Duration::from_millis(5000),
        }
    }

    fn call() -> VideoCall {
        VideoCall {
            api_key: "key".into(),
            model: "gemini-3-flash-preview".into(),
            prompt: "summarize".into(),
            video: PathBuf::from("/tmp/v.mp4"),
            resolution: VideoResolution::Low,
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> (RemoteVisionClient, Arc<ApiRequestRepository>) {
        let log = Arc::new(ApiRequestRepository::new(Arc::new(Database::in_memory().unwrap())));
        (
            RemoteVisionClient::new(transport, Arc::clone(&log), policy()),
            log,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_logs_one_success() {
        let transport = Arc::new(ScriptedTransport::new().processing_polls(2));
        let (client, log) = client(Arc::clone(&transport));

        let generation = client.summarize_video(call()).await.unwrap();
        assert_eq!(generation.text, "summary text");

        let rows = log.query(None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].request.success);
        assert_eq!(rows[0].request.endpoint, "generateContent");
        assert_eq!(rows[0].request.usage.total_tokens, Some(150));
        assert_eq!(transport.polls(), 2);

        let sent = transport.last_generate().unwrap();
        let file = sent.file.unwrap();
        assert_eq!(file.media_resolution, "MEDIA_RESOLUTION_LOW");
        assert_eq!(sent.prompt, "summarize");
    }

    #[tokio::test(start_paused = true)]
    async fn test_states_are_visited_in_order() {
        let transport = ScriptedTransport::new().processing_polls(1);
        let mut call = RemoteCall::new(&transport, policy(), call());
        let mut seen = vec![call.state().name()];
        while !call.state().is_terminal() {
            call.step().await;
            seen.push(call.state().name());
        }
        seen.dedup();
        assert_eq!(
            seen,
            vec![
                "created",
                "uploading",
                "uploaded",
                "processing",
                "active",
                "summarizing",
                "done"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_retried_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new().upload_failures(2));
        let (client, log) = client(Arc::clone(&transport));

        assert!(client.summarize_video(call()).await.is_ok());
        assert_eq!(transport.uploads(), 3);
        assert_eq!(log.count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_exhaustion_logs_upload_failure() {
        let transport = Arc::new(ScriptedTransport::new().upload_failures(10));
        let (client, log) = client(Arc::clone(&transport));

        let err = client.summarize_video(call()).await.unwrap_err();
        assert!(matches!(err, RemoteFailure::Upload { attempts: 3, .. }));
        assert_eq!(transport.uploads(), 3);

        let rows = log.query(None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].request.success);
        assert_eq!(rows[0].request.error_kind.as_deref(), Some("UploadFailure"));
        assert_eq!(rows[0].request.endpoint, "files.upload");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let transport = Arc::new(ScriptedTransport::new().upload_failures(10));
        let (client, _log) = client(transport);

        let started = Instant::now();
        let _ = client.summarize_video(call()).await;
        // 100 ms then 200 ms between the three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_timeout() {
        let transport = Arc::new(ScriptedTransport::new().processing_polls(u32::MAX));
        let (client, log) = client(Arc::clone(&transport));

        let err = client.summarize_video(call()).await.unwrap_err();
        assert!(matches!(err, RemoteFailure::ProcessingTimeout { .. }));
        // One poll per second until five seconds have passed.
        assert_eq!(transport.polls(), 5);

        let rows = log.query(None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request.error_kind.as_deref(), Some("ProcessingTimeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_failed_state() {
        let transport = Arc::new(ScriptedTransport::new().file_fails());
        let (client, log) = client(transport);

        let err = client.summarize_video(call()).await.unwrap_err();
        assert!(matches!(err, RemoteFailure::Processing(_)));
        assert_eq!(log.count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_quota_failure() {
        let transport = Arc::new(ScriptedTransport::new().generate_error(TransportError::Status {
            status: 429,
            body: "quota".into(),
        }));
        let (client, log) = client(transport);

        let err = client.summarize_video(call()).await.unwrap_err();
        match err {
            RemoteFailure::Generation { kind, status, .. } => {
                assert_eq!(kind, GenerationFailureKind::Quota);
                assert_eq!(status, Some(429));
            }
            other => panic!("unexpected failure {other:?}"),
        }

        let rows = log.query(None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request.status_code, Some(429));
        assert_eq!(rows[0].request.error_kind.as_deref(), Some("GenerationFailure"));
    }

    #[tokio::test]
    async fn test_generate_text_logs_once() {
        let transport = Arc::new(ScriptedTransport::new());
        let (client, log) = client(Arc::clone(&transport));

        let generation = client.generate_text("key", "m", "daily prompt").await.unwrap();
        assert_eq!(generation.text, "summary text");
        assert!(transport.last_generate().unwrap().file.is_none());
        assert_eq!(log.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generate_text_failure_logged() {
        let transport = Arc::new(
            ScriptedTransport::new().generate_error(TransportError::Malformed("empty".into())),
        );
        let (client, log) = client(transport);

        let err = client.generate_text("key", "m", "p").await.unwrap_err();
        assert!(matches!(
            err,
            RemoteFailure::Generation {
                kind: GenerationFailureKind::Malformed,
                ..
            }
        ));
        let rows = log.query(None, None, None).unwrap();
        assert!(!rows[0].request.success);
    }
}
