//! The backend seam: recognizer lookup and stream control

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use sotto_audio::{AudioFormat, AudioFrame};

use crate::error::Result;
use crate::events::RecognitionEvent;

/// Parameters for one streaming recognition request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Locale identifier, e.g. "en-US".
    pub locale: String,
    /// Whether recognition should stay on this machine.
    pub on_device: bool,
    /// Whether interim results are wanted in addition to finals.
    pub report_partials: bool,
    /// Format the audio frames will arrive in.
    pub format: AudioFormat,
}

/// Outcome of resolving a recognizer for a locale.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    /// True only when on-device was preferred AND the backend supports it
    /// for this locale. An unsupported on-device preference downgrades to
    /// network-backed recognition; it is never an error.
    pub on_device_active: bool,
}

/// A streaming speech-to-text capability.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Locale-indexed recognizer lookup. Fails with
    /// [`RecognitionError::RecognizerUnavailable`] only when no recognizer
    /// exists for the locale at all.
    ///
    /// [`RecognitionError::RecognizerUnavailable`]: crate::RecognitionError::RecognizerUnavailable
    fn resolve(&self, locale: &str, prefer_on_device: bool) -> Result<Resolution>;

    /// Open a recognition stream. Returns the control handle and the
    /// receiver the stream's results arrive on.
    async fn open(
        &self,
        request: StreamRequest,
    ) -> Result<(Box<dyn RecognitionStream>, UnboundedReceiver<RecognitionEvent>)>;
}

/// Control handle for one open stream.
///
/// Every method is non-blocking (internally a queue handoff), so all of them
/// are safe to call from latency-sensitive contexts. A stream cancelled
/// while a final result is in flight may still deliver that one last
/// `Final` event; consumers must tolerate it.
pub trait RecognitionStream: Send {
    /// Feed one captured frame.
    fn append(&self, frame: AudioFrame);

    /// Signal end-of-audio; the stream may still deliver pending results.
    fn finish(&self);

    /// Tear the stream down. Errors caused by the cancellation surface as
    /// [`RecognitionError::Cancelled`].
    ///
    /// [`RecognitionError::Cancelled`]: crate::RecognitionError::Cancelled
    fn cancel(&self);
}
