//! Error taxonomy for the load → page → render pipeline

use super::task::Dropped;

/// Why reading a file-like source failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFailure {
    NotFound,
    Permission,
    Aborted,
    Unknown,
}

impl ReadFailure {
    #[must_use]
    pub fn from_io(error: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::PermissionDenied => Self::Permission,
            ErrorKind::Interrupted => Self::Aborted,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NotFound => "Error while reading a file: File not found.",
            Self::Permission => "Error while reading a file: Security error.",
            Self::Aborted => "Error while reading a file: Aborted.",
            Self::Unknown => "Error while reading a file.",
        };
        f.write_str(msg)
    }
}

/// Failures while turning a document reference into a load descriptor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("invalid document source: {0}")]
    InvalidSource(String),

    #[error("{0}")]
    Read(ReadFailure),

    #[error("file read was dropped before it completed")]
    ReadDropped,
}

impl SourceError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidSource(detail.into())
    }
}

impl From<Dropped> for SourceError {
    fn from(_: Dropped) -> Self {
        Self::ReadDropped
    }
}

/// Failures reported by a document engine.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("document load failed: {0}")]
    Load(String),

    #[error("page fetch failed: {0}")]
    Page(String),

    #[error("render failed: {0}")]
    Render(String),

    /// The render job was cancelled. Expected; never reported.
    #[error("rendering cancelled")]
    RenderCancelled,

    #[error("document has been destroyed")]
    Destroyed,

    #[error(transparent)]
    Dropped(#[from] Dropped),
}

impl EngineError {
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::RenderCancelled)
    }
}

/// Any failure a stage can settle `error` with.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A stage reports `success` but owns no handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{stage} status is success but no handle is held; this is unexpected")]
pub struct InvariantViolation {
    pub stage: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn read_failures_map_from_io_kinds() {
        let cases = [
            (io::ErrorKind::NotFound, ReadFailure::NotFound),
            (io::ErrorKind::PermissionDenied, ReadFailure::Permission),
            (io::ErrorKind::Interrupted, ReadFailure::Aborted),
            (io::ErrorKind::InvalidData, ReadFailure::Unknown),
        ];
        for (kind, expected) in cases {
            assert_eq!(ReadFailure::from_io(&io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn only_render_cancel_is_cancellation() {
        assert!(EngineError::RenderCancelled.is_cancellation());
        assert!(!EngineError::Render("x".into()).is_cancellation());
        assert!(!EngineError::Destroyed.is_cancellation());
    }
}
