use std::fmt;

use thiserror::Error;

/// Top-level error type for the Clarity system.
///
/// Subsystem crates either return this directly or define their own error
/// types with a `From` conversion, so `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClarityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteFailure),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for ClarityError {
    fn from(err: toml::de::Error) -> Self {
        ClarityError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ClarityError {
    fn from(err: toml::ser::Error) -> Self {
        ClarityError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ClarityError {
    fn from(err: serde_json::Error) -> Self {
        ClarityError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Clarity operations.
pub type Result<T> = std::result::Result<T, ClarityError>;

/// Sub-classification of a failed `generateContent` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationFailureKind {
    /// HTTP 429, quota or rate limit exhausted.
    Quota,
    /// HTTP 401/403, the key was rejected.
    Auth,
    /// The response could not be parsed or carried no text.
    Malformed,
    /// Any other non-success status.
    Http,
    /// The request never produced a response.
    Network,
}

impl GenerationFailureKind {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::Quota,
            401 | 403 => Self::Auth,
            _ => Self::Http,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::Auth => "auth",
            Self::Malformed => "malformed",
            Self::Http => "http",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for GenerationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a remote vision call.
///
/// Each variant has a stable reason code (see [`RemoteFailure::kind_code`])
/// that is persisted in the API request log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    #[error("upload failed after {attempts} attempt(s): {message}")]
    Upload { attempts: u32, message: String },

    #[error("remote file not ready after {waited_ms} ms")]
    ProcessingTimeout { waited_ms: u64 },

    #[error("remote processing failed: {0}")]
    Processing(String),

    #[error("generation failed ({kind}): {message}")]
    Generation {
        kind: GenerationFailureKind,
        status: Option<u16>,
        message: String,
    },
}

impl RemoteFailure {
    pub fn kind_code(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "UploadFailure",
            Self::ProcessingTimeout { .. } => "ProcessingTimeout",
            Self::Processing(_) => "ProcessingFailure",
            Self::Generation { .. } => "GenerationFailure",
        }
    }

    /// HTTP status of the failing request, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Generation { status, .. } => *status,
            _ => None,
        }
    }
}
