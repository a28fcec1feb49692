//! Input level measurement
//!
//! The HUD's mic meter wants a cheap, stable amplitude proxy, not a
//! loudness-accurate measurement. Mean absolute amplitude of the first
//! channel, scaled up for visibility and clamped, is good enough and is
//! safe to compute inside the audio callback.

/// Visibility gain applied to the mean amplitude before clamping.
pub const LEVEL_GAIN: f32 = 10.0;

/// Normalized input level for one interleaved buffer, in [0.0, 1.0].
///
/// Only the first channel is measured; averaging channels would halve the
/// reading when the mic only drives one of them.
pub fn input_level(samples: &[f32], channels: u16) -> f32 {
    if samples.is_empty() || channels == 0 {
        return 0.0;
    }

    let step = channels as usize;
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for sample in samples.iter().step_by(step) {
        sum += sample.abs();
        count += 1;
    }

    let mean = sum / count as f32;
    (mean * LEVEL_GAIN).min(1.0)
}
