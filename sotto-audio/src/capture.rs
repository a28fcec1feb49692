//! Microphone capture tap with cpal
//!
//! Installs a fixed-size tap on an input device at its native format. Each
//! buffer is converted to f32, measured for level, and handed to the
//! registered frame callback on the audio thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{AudioError, Result};
use crate::level::input_level;
use crate::{AudioConfig, AudioFormat, AudioFrame, CapturedFrame};

/// Callback invoked once per captured buffer, on the audio thread.
///
/// Implementations must not block; an unbounded channel send is the intended
/// body.
pub type FrameCallback = Arc<dyn Fn(CapturedFrame) + Send + Sync>;

/// The tap-install/remove contract the session controller drives.
pub trait AudioTap {
    /// Format buffers will be captured with.
    fn format(&self) -> AudioFormat;

    /// Install the tap and start the device producing buffers.
    fn install(&mut self, on_frame: FrameCallback) -> Result<()>;

    /// Remove the tap and stop capture. Idempotent.
    fn remove(&mut self);
}

/// Input device information for `--list-devices`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Capture tap over a cpal input stream.
pub struct CaptureTap {
    config: AudioConfig,
    device: Device,
    supported: cpal::SupportedStreamConfig,
    format: AudioFormat,
    stream: Option<Stream>,
    active: Arc<AtomicBool>,
}

impl CaptureTap {
    /// Resolve the input device and its native format.
    ///
    /// Fails when no device is available or the resolved format is unusable
    /// (zero sample rate or zero channels) - there is no session to run
    /// without a microphone.
    pub fn open(config: AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(index) = config.device_index {
            let mut devices = host
                .input_devices()
                .map_err(|e| AudioError::device(format!("Failed to enumerate devices: {}", e)))?;
            devices
                .nth(index)
                .ok_or_else(|| AudioError::device(format!("Device index {} not found", index)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| AudioError::device("No default input device found"))?
        };

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::device(format!("Failed to get device config: {}", e)))?;

        let format = AudioFormat {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
        };

        if !format.is_usable() {
            return Err(AudioError::invalid_format(format!(
                "{} Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        debug!(
            "Resolved input device: {} ({} Hz, {} channels, {:?})",
            device_name,
            format.sample_rate,
            format.channels,
            supported.sample_format()
        );

        Ok(Self {
            config,
            device,
            supported,
            format,
            stream: None,
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// List available input devices.
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        for (index, device) in host
            .input_devices()
            .map_err(|e| AudioError::device(format!("Failed to enumerate devices: {}", e)))?
            .enumerate()
        {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Unknown Device {}", index));

            let (channels, sample_rate) = device
                .default_input_config()
                .map(|c| (c.channels(), c.sample_rate().0))
                .unwrap_or((0, 0));

            devices.push(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels,
                sample_rate,
            });
        }

        Ok(devices)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Audio-thread tail of the capture callback: measure, then hand off.
fn emit_frame(samples: Vec<f32>, format: AudioFormat, on_frame: &FrameCallback) {
    let level = input_level(&samples, format.channels);
    on_frame(CapturedFrame {
        frame: AudioFrame { samples, format },
        level,
    });
}

impl AudioTap for CaptureTap {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn install(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyCapturing);
        }

        let stream_config = StreamConfig {
            channels: self.format.channels,
            sample_rate: cpal::SampleRate(self.format.sample_rate),
            buffer_size: BufferSize::Fixed(self.config.buffer_frames as u32),
        };

        let format = self.format;
        let err_fn = |err| error!("Audio stream error: {}", err);

        let stream = match self.supported.sample_format() {
            SampleFormat::F32 => {
                let active = Arc::clone(&self.active);
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !active.load(Ordering::Relaxed) {
                            return;
                        }
                        emit_frame(data.to_vec(), format, &on_frame);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let active = Arc::clone(&self.active);
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if !active.load(Ordering::Relaxed) {
                            return;
                        }
                        let samples: Vec<f32> =
                            data.iter().map(|&s| s as f32 / 32768.0).collect();
                        emit_frame(samples, format, &on_frame);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let active = Arc::clone(&self.active);
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        if !active.load(Ordering::Relaxed) {
                            return;
                        }
                        let samples: Vec<f32> = data
                            .iter()
                            .map(|&s| (s as f32 - 32768.0) / 32768.0)
                            .collect();
                        emit_frame(samples, format, &on_frame);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioError::stream(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        }
        .map_err(|e| AudioError::stream(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::stream(format!("Failed to start input stream: {}", e)))?;

        self.stream = Some(stream);
        self.active.store(true, Ordering::SeqCst);
        debug!(
            "Capture tap installed ({} frame buffers)",
            self.config.buffer_frames
        );

        Ok(())
    }

    fn remove(&mut self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        if was_active {
            debug!("Capture tap removed");
        }
    }
}

impl Drop for CaptureTap {
    fn drop(&mut self) {
        self.remove();
    }
}
