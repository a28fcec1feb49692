//! Microphone capture authorization gate
//!
//! The session must not start without capture authorization. There is no
//! cross-platform permission broker to ask, so the probe is behavioral: a
//! default input device that exists and describes its configuration is
//! treated as authorized, a missing device as denied, and a device that
//! refuses to describe itself as undetermined - on macOS that is what a
//! not-yet-granted microphone permission looks like through CoreAudio.
//!
//! The helper never shows a permission dialog itself; that UX belongs to
//! the host. Anything but `Authorized` is fatal here, and the host retries
//! with a fresh process once the user has acted.

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::debug;

/// Authorization state for microphone capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Capture is available.
    Authorized,
    /// No usable input device; capture was refused.
    Denied,
    /// The device would not describe itself; permission not yet settled.
    Undetermined,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Denied => "denied",
            Self::Undetermined => "undetermined",
        }
    }
}

/// Probe microphone capture authorization.
pub fn check_capture_authorization() -> AuthorizationStatus {
    let host = cpal::default_host();

    let Some(device) = host.default_input_device() else {
        return AuthorizationStatus::Denied;
    };

    match device.default_input_config() {
        Ok(config) => {
            debug!(
                "Capture authorized: {} ({} Hz)",
                device.name().unwrap_or_else(|_| "Unknown".to_string()),
                config.sample_rate().0
            );
            AuthorizationStatus::Authorized
        }
        Err(e) => {
            debug!("Input device refused config query: {}", e);
            AuthorizationStatus::Undetermined
        }
    }
}
