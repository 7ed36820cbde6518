use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("stream read failed: {0}")]
    Stream(std::io::Error),
    #[error("stream ended")]
    StreamEnded,
    #[error("unsupported stream mode '{0}', expected 'mjpeg' or 'polling'")]
    UnsupportedMode(String),
    #[error("video source panicked: {0}")]
    Panicked(String),
}

/// Outcome of a bounded or closure-aware frame wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    #[error("camera reader is closed")]
    Closed,
    #[error("no frame within {0:?}")]
    Timeout(Duration),
}

/// Run a collaborator call, turning a panic into [`SourceError::Panicked`].
pub(crate) fn catch_source_panic<T>(
    f: impl FnOnce() -> Result<T, SourceError>,
) -> Result<T, SourceError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(SourceError::Panicked(panic_message(&*payload))))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
