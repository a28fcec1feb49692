//! Sotto audio capture
//!
//! Pulls fixed-size buffers from the default input device at its native
//! format and measures a normalized input level per buffer for the HUD's
//! mic meter.
//!
//! ## Architecture
//!
//! ```text
//! Audio Device (cpal)
//!   │
//!   └─> CaptureTap callback (audio thread)
//!         │
//!         ├─> input_level() per buffer
//!         │
//!         └─> FrameCallback -> session controller
//! ```
//!
//! The cpal data callback runs on a dedicated audio thread and must never
//! block: it converts samples, computes the level, and hands the frame to
//! the registered callback, which is expected to do nothing more than an
//! unbounded channel send.

pub mod capture;
pub mod error;
pub mod level;

pub use capture::{AudioTap, CaptureTap, DeviceInfo, FrameCallback};
pub use error::{AudioError, Result};
pub use level::input_level;

use serde::{Deserialize, Serialize};

/// Frames per capture buffer (samples per channel, per callback).
pub const TAP_BUFFER_FRAMES: usize = 1024;

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Device index (None = default input device)
    pub device_index: Option<usize>,
    /// Frames per capture buffer
    pub buffer_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            buffer_frames: TAP_BUFFER_FRAMES,
        }
    }
}

/// The format audio was captured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// A format with no sample rate or no channels means no usable
    /// microphone; capture setup must fail before a session starts.
    pub fn is_usable(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

/// One captured buffer of interleaved f32 PCM, ownership transferred to the
/// consumer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub format: AudioFormat,
}

/// A frame paired with the input level computed for it on the audio thread.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: AudioFrame,
    pub level: f32,
}
