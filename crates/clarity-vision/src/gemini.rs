//! Google Generative Language API transport (File API + generateContent).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use clarity_core::types::TokenUsage;

use crate::error::TransportError;
use crate::transport::{GenerateRequest, Generation, RemoteFile, VisionTransport};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File {
        #[serde(rename = "fileData")]
        file_data: FileData<'a>,
        #[serde(rename = "mediaResolution")]
        media_resolution: MediaResolution<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    file_uri: &'a str,
    mime_type: &'a str,
}

#[derive(Debug, Serialize)]
struct MediaResolution<'a> {
    level: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

/// `files.get` and upload responses come either bare or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileEnvelope {
    Wrapped { file: RemoteFile },
    Bare(RemoteFile),
}

fn generate_body(request: &GenerateRequest) -> GenerateBody<'_> {
    let mut parts = Vec::with_capacity(2);
    if let Some(file) = &request.file {
        parts.push(Part::File {
            file_data: FileData {
                file_uri: &file.uri,
                mime_type: &file.mime_type,
            },
            media_resolution: MediaResolution {
                level: file.media_resolution,
            },
        });
    }
    parts.push(Part::Text {
        text: &request.prompt,
    });
    GenerateBody {
        contents: vec![Content { parts }],
    }
}

fn parse_generation(body: &str) -> Result<Generation, TransportError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| TransportError::Malformed("response contained no text".into()))?;

    let usage = response
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    Ok(Generation { text, usage })
}

fn parse_file(body: &str) -> Result<RemoteFile, TransportError> {
    match serde_json::from_str(body) {
        Ok(FileEnvelope::Wrapped { file }) | Ok(FileEnvelope::Bare(file)) => Ok(file),
        Err(e) => Err(TransportError::Malformed(e.to_string())),
    }
}

// =============================================================================
// Transport
// =============================================================================

pub struct GeminiTransport {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiTransport {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<String, TransportError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VisionTransport for GeminiTransport {
    async fn upload(&self, api_key: &str, path: &Path) -> Result<RemoteFile, TransportError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Network(format!("failed to read {}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());

        debug!(file = %file_name, size = bytes.len(), "Uploading file");
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", api_key)])
            .multipart(form)
            .send()
            .await?;
        parse_file(&Self::read_body(response).await?)
    }

    async fn get_file(&self, api_key: &str, name: &str) -> Result<RemoteFile, TransportError> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .query(&[("key", api_key)])
            .send()
            .await?;
        parse_file(&Self::read_body(response).await?)
    }

    async fn generate(
        &self,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<Generation, TransportError> {
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, request.model
            ))
            .query(&[("key", api_key)])
            .json(&generate_body(request))
            .send()
            .await?;
        parse_generation(&Self::read_body(response).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FileRef, FileState};

    #[test]
    fn test_video_request_body() {
        let request = GenerateRequest {
            model: "gemini-3-flash-preview".into(),
            prompt: "describe".into(),
            file: Some(FileRef {
                uri: "https://files/abc".into(),
                mime_type: "video/mp4".into(),
                media_resolution: "MEDIA_RESOLUTION_LOW",
            }),
        };
        let json = serde_json::to_value(generate_body(&request)).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["fileData"]["fileUri"], "https://files/abc");
        assert_eq!(parts[0]["fileData"]["mimeType"], "video/mp4");
        assert_eq!(parts[0]["mediaResolution"]["level"], "MEDIA_RESOLUTION_LOW");
        assert_eq!(parts[1]["text"], "describe");
    }

    #[test]
    fn test_text_only_request_body() {
        let request = GenerateRequest {
            model: "m".into(),
            prompt: "daily".into(),
            file: None,
        };
        let json = serde_json::to_value(generate_body(&request)).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "daily");
    }

    #[test]
    fn test_parse_generation_with_usage() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "Coding in editor"}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 30, "totalTokenCount": 150}
        }"#;
        let generation = parse_generation(body).unwrap();
        assert_eq!(generation.text, "Coding in editor");
        assert_eq!(generation.usage.prompt_tokens, Some(120));
        assert_eq!(generation.usage.completion_tokens, Some(30));
        assert_eq!(generation.usage.total_tokens, Some(150));
    }

    #[test]
    fn test_parse_generation_without_candidates() {
        let err = parse_generation(r#"{"candidates": []}"#).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
        assert!(parse_generation("not json").is_err());
    }

    #[test]
    fn test_parse_file_wrapped_and_bare() {
        let wrapped = r#"{"file": {"name": "files/a", "uri": "u", "mimeType": "video/mp4", "state": "PROCESSING"}}"#;
        assert_eq!(parse_file(wrapped).unwrap().state, FileState::Processing);

        let bare = r#"{"name": "files/a", "uri": "u", "state": "ACTIVE"}"#;
        assert_eq!(parse_file(bare).unwrap().state, FileState::Active);

        assert!(parse_file(r#"{"error": {}}"#).is_err());
    }
}
