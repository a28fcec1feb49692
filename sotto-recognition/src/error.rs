//! Error types for recognition streams

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecognitionError>;

#[derive(Error, Debug)]
pub enum RecognitionError {
    /// The expected consequence of cancelling an in-flight stream. Not a
    /// real failure; callers that initiated the cancellation swallow it.
    #[error("Recognition cancelled")]
    Cancelled,

    #[error("No speech recognizer available for {0}")]
    RecognizerUnavailable(String),

    #[error("Recognition stream error: {0}")]
    StreamError(String),

    #[error("Recognizer connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecognitionError {
    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::StreamError(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
