use thiserror::Error;

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// Errors surfaced by the recording and still capture pipeline.
///
/// Nothing in here is fatal to the process. After any of these the pipeline
/// is back in `Idle` (or was never moved out of it) and can be used again.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a recording session is already active")]
    AlreadyActive,

    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),

    /// Ordering or logic violation while feeding the encoder. Fatal to the
    /// session it happened in.
    #[error("frame rejected by encoder: {0}")]
    IngestFailed(String),

    #[error("encoding failed: {0}")]
    EncodeFailed(#[from] EncodeFailure),

    #[error("still capture failed: {0}")]
    StillCaptureFailed(String),

    #[error("a still capture is already in progress")]
    CaptureInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeFailure {
    /// No frames were ingested, or the container came out with zero bytes.
    #[error("artifact is empty")]
    Empty,

    #[error("session aborted after ingest failure: {0}")]
    Ingest(String),

    #[error("{0}")]
    Codec(String),
}

impl CaptureError {
    pub fn codec(msg: impl std::fmt::Display) -> Self {
        CaptureError::EncodeFailed(EncodeFailure::Codec(msg.to_string()))
    }

    pub fn still(msg: impl std::fmt::Display) -> Self {
        CaptureError::StillCaptureFailed(msg.to_string())
    }

    pub fn is_empty_artifact(&self) -> bool {
        matches!(self, CaptureError::EncodeFailed(EncodeFailure::Empty))
    }
}
