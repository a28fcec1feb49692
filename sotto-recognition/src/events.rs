use crate::error::RecognitionError;

/// One result from an open recognition stream.
///
/// Ordering: once a `Final` or a fatal `Error` has been produced, no later
/// `Partial` for the same session is meaningful - the stream is logically
/// closed. A stream may produce several `Final`s before that point
/// (segmentation boundaries); each stands on its own.
#[derive(Debug)]
pub enum RecognitionEvent {
    /// Interim transcription, superseded by the next event.
    Partial(String),
    /// A settled transcription for a segment of audio.
    Final(String),
    /// The stream failed, or was cancelled.
    Error(RecognitionError),
}
