use thiserror::Error;

use clarity_core::error::{ClarityError, GenerationFailureKind};

/// Outcome of a failed video assembly.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// Not enough frames in the window. Benign: the window is retried later.
    #[error("insufficient frames: found {found}, need {required}")]
    InsufficientFrames { found: usize, required: usize },

    #[error("video encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Storage(#[from] ClarityError),
}

impl From<AssembleError> for ClarityError {
    fn from(err: AssembleError) -> Self {
        match err {
            AssembleError::Storage(inner) => inner,
            other => ClarityError::Encoding(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AssembleError {
    fn from(err: std::io::Error) -> Self {
        AssembleError::Encoding(err.to_string())
    }
}

/// Failure of a single request to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classification used when this error ends a generation request.
    pub fn generation_kind(&self) -> GenerationFailureKind {
        match self {
            TransportError::Status { status, .. } => GenerationFailureKind::from_status(*status),
            TransportError::Network(_) => GenerationFailureKind::Network,
            TransportError::Malformed(_) => GenerationFailureKind::Malformed,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_kind_classification() {
        let quota = TransportError::Status {
            status: 429,
            body: "RESOURCE_EXHAUSTED".into(),
        };
        assert_eq!(quota.generation_kind(), GenerationFailureKind::Quota);
        assert_eq!(quota.status(), Some(429));
        assert_eq!(
            TransportError::Network("timeout".into()).generation_kind(),
            GenerationFailureKind::Network
        );
        assert_eq!(
            TransportError::Malformed("eof".into()).generation_kind(),
            GenerationFailureKind::Malformed
        );
    }

    #[test]
    fn test_assemble_error_into_clarity() {
        let err: ClarityError = AssembleError::Encoding("ffmpeg missing".into()).into();
        assert!(matches!(err, ClarityError::Encoding(_)));

        let err: ClarityError =
            AssembleError::Storage(ClarityError::Storage("locked".into())).into();
        assert!(matches!(err, ClarityError::Storage(_)));
    }
}
