//! Remote transcription backend
//!
//! Streams audio to a transcription server over TCP and reads results back
//! as newline-delimited JSON. The wire exchange:
//!
//! 1. client sends one JSON start header declaring locale and audio format
//! 2. client streams raw PCM (first channel, s16le at the declared rate)
//! 3. server answers with NDJSON events: `partial`, `final`, `error`
//! 4. client half-closes the socket to signal end-of-audio; the server may
//!    flush one last `final` before closing
//!
//! The server owns resampling; the header's `sample_rate` is whatever the
//! capture device natively produced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use sotto_audio::AudioFrame;

use crate::error::{RecognitionError, Result};
use crate::events::RecognitionEvent;
use crate::stream::{RecognitionStream, Resolution, SpeechBackend, StreamRequest};

/// What the configured recognizer service is declared to handle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Locales the service transcribes. Empty means any locale is accepted.
    pub locales: Vec<String>,
    /// Locales the service can transcribe without leaving the machine.
    pub on_device_locales: Vec<String>,
}

impl Capabilities {
    pub fn supports_locale(&self, locale: &str) -> bool {
        self.locales.is_empty() || self.locales.iter().any(|l| l.eq_ignore_ascii_case(locale))
    }

    pub fn supports_on_device(&self, locale: &str) -> bool {
        self.on_device_locales
            .iter()
            .any(|l| l.eq_ignore_ascii_case(locale))
    }
}

/// JSON header sent before any audio.
#[derive(Debug, Serialize)]
struct StartHeader<'a> {
    locale: &'a str,
    on_device: bool,
    report_partials: bool,
    sample_rate: u32,
    channels: u16,
    encoding: &'a str,
}

/// Result events the server writes, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Partial { text: String },
    Final { text: String },
    Error { message: String },
}

impl From<WireEvent> for RecognitionEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Partial { text } => RecognitionEvent::Partial(text),
            WireEvent::Final { text } => RecognitionEvent::Final(text),
            WireEvent::Error { message } => {
                RecognitionEvent::Error(RecognitionError::stream(message))
            }
        }
    }
}

enum StreamCommand {
    Audio(Vec<u8>),
    Finish,
    Cancel,
}

/// TCP/NDJSON transcription backend.
pub struct RemoteBackend {
    addr: String,
    capabilities: Capabilities,
}

impl RemoteBackend {
    pub fn new(addr: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            addr: addr.into(),
            capabilities,
        }
    }
}

#[async_trait]
impl SpeechBackend for RemoteBackend {
    fn resolve(&self, locale: &str, prefer_on_device: bool) -> Result<Resolution> {
        if !self.capabilities.supports_locale(locale) {
            return Err(RecognitionError::RecognizerUnavailable(locale.to_string()));
        }

        Ok(Resolution {
            on_device_active: prefer_on_device && self.capabilities.supports_on_device(locale),
        })
    }

    async fn open(
        &self,
        request: StreamRequest,
    ) -> Result<(Box<dyn RecognitionStream>, UnboundedReceiver<RecognitionEvent>)> {
        let socket = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| RecognitionError::connection(format!("{}: {}", self.addr, e)))?;
        socket
            .set_nodelay(true)
            .map_err(|e| RecognitionError::connection(format!("set_nodelay: {}", e)))?;

        let (read_half, mut write_half) = socket.into_split();

        let header = StartHeader {
            locale: &request.locale,
            on_device: request.on_device,
            report_partials: request.report_partials,
            sample_rate: request.format.sample_rate,
            channels: 1,
            encoding: "s16le",
        };
        let mut header_line = serde_json::to_string(&header)
            .map_err(|e| RecognitionError::stream(format!("header encode: {}", e)))?;
        header_line.push('\n');
        write_half
            .write_all(header_line.as_bytes())
            .await
            .map_err(|e| RecognitionError::connection(format!("header write: {}", e)))?;

        debug!(
            "Recognition stream opened: {} ({} Hz, on_device={})",
            request.locale, request.format.sample_rate, request.on_device
        );

        let cancelled = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<StreamCommand>();

        // Writer task owns the write half. Finish half-closes the socket so
        // the server knows audio ended; Cancel just drops it.
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    StreamCommand::Audio(bytes) => {
                        if let Err(e) = write_half.write_all(&bytes).await {
                            debug!("Audio write ended: {}", e);
                            break;
                        }
                    }
                    StreamCommand::Finish => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                    StreamCommand::Cancel => break,
                }
            }
        });

        // Reader task parses result lines until the server closes.
        let reader_cancelled = Arc::clone(&cancelled);
        let reader_finished = Arc::clone(&finished);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WireEvent>(&line) {
                            Ok(event) => {
                                if event_tx.send(event.into()).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Unparseable recognizer event ({}): {}", e, line),
                        }
                    }
                    Ok(None) => {
                        // EOF is expected after finish or cancel; otherwise
                        // the server went away mid-session.
                        if !reader_cancelled.load(Ordering::SeqCst)
                            && !reader_finished.load(Ordering::SeqCst)
                        {
                            let _ = event_tx.send(RecognitionEvent::Error(
                                RecognitionError::stream("recognizer closed the connection"),
                            ));
                        }
                        break;
                    }
                    Err(e) => {
                        let error = if reader_cancelled.load(Ordering::SeqCst) {
                            RecognitionError::Cancelled
                        } else {
                            RecognitionError::stream(e.to_string())
                        };
                        let _ = event_tx.send(RecognitionEvent::Error(error));
                        break;
                    }
                }
            }
        });

        let handle = RemoteStream {
            commands: command_tx,
            cancelled,
            finished,
        };

        Ok((Box::new(handle), event_rx))
    }
}

/// Control handle for one open remote stream.
struct RemoteStream {
    commands: UnboundedSender<StreamCommand>,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl RecognitionStream for RemoteStream {
    fn append(&self, frame: AudioFrame) {
        if self.finished.load(Ordering::SeqCst) || self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(StreamCommand::Audio(frame_to_s16le(&frame)));
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(StreamCommand::Finish);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(StreamCommand::Cancel);
    }
}

/// Downmix to the first channel and convert to little-endian s16.
fn frame_to_s16le(frame: &AudioFrame) -> Vec<u8> {
    let step = frame.format.channels.max(1) as usize;
    let mut bytes = Vec::with_capacity(frame.samples.len() / step * 2);
    for sample in frame.samples.iter().step_by(step) {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
