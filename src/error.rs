//! Error taxonomy shared by sources, detectors and renderers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewerError {
    /// Missing startup argument or unreadable detector model.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to open stream {url}: {reason}")]
    SourceConnect { url: String, reason: String },

    #[error("failed to pull frame: {0}")]
    Pull(String),

    /// Recoverable per-frame failure; the frame is skipped.
    #[error("failed to decode frame: {0}")]
    TransientDecode(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("viewer {0} panicked")]
    WorkerPanicked(char),
}

impl ViewerError {
    pub fn connect(url: &str, reason: impl std::fmt::Display) -> Self {
        ViewerError::SourceConnect {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the worker loop may continue after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ViewerError::TransientDecode(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ViewerError::Configuration(_))
    }
}
