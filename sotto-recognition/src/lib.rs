//! Sotto streaming recognition
//!
//! Bridges appended audio frames to interim/final transcription results.
//! The recognition engine itself is an external capability reached through
//! the [`SpeechBackend`] seam:
//!
//! - [`SpeechBackend::resolve`] is the locale-indexed recognizer lookup,
//!   including the permissive on-device downgrade
//! - [`SpeechBackend::open`] yields a [`RecognitionStream`] control handle
//!   plus a channel of [`RecognitionEvent`]s
//!
//! [`RemoteBackend`] is the shipped implementation: it streams PCM to a
//! transcription server over TCP and reads newline-delimited JSON result
//! events back. An on-device engine slots in behind the same trait.

pub mod error;
pub mod events;
pub mod remote;
pub mod stream;

pub use error::{RecognitionError, Result};
pub use events::RecognitionEvent;
pub use remote::{Capabilities, RemoteBackend};
pub use stream::{RecognitionStream, Resolution, SpeechBackend, StreamRequest};
