//! Session controller
//!
//! Owns the lifecycle of one dictation session: authorization gate,
//! recognizer resolution, stream open, tap install, steady-state pumping of
//! frames and results into protocol lines, and the idempotent stop sequence.
//!
//! Three contexts touch a session: the audio callback (which only enqueues
//! frames), the recognizer's reader task (which only enqueues events), and
//! the control context driving [`SessionController::pump`] and
//! [`SessionController::stop`]. The session record itself is only mutated
//! from the control context, behind a mutex.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use sotto_audio::{AudioTap, CapturedFrame, FrameCallback};
use sotto_protocol::{LineWriter, ProtocolLine};
use sotto_recognition::{RecognitionEvent, RecognitionStream, SpeechBackend, StreamRequest};

use crate::authorization::AuthorizationStatus;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Listening,
    Stopping,
    Terminated,
}

/// What one session was asked to do.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Locale identifier, e.g. "en-US".
    pub language: String,
    /// Prefer on-device recognition; silently downgraded when the locale
    /// lacks support.
    pub prefer_on_device: bool,
}

/// Shared session record.
///
/// `last_transcript` tracks the most recent text whether it arrived as a
/// partial or a final; `final_emitted` says whether a FINAL line for that
/// exact text has been written. Together they drive the closing-final rule:
/// text delivered only as PARTIAL is never lost at stop, and text already
/// delivered as FINAL is never duplicated.
#[derive(Debug)]
struct SessionRecord {
    state: SessionState,
    last_transcript: String,
    final_emitted: bool,
    on_device_active: bool,
}

enum Step {
    Frame(Option<CapturedFrame>),
    Event(Option<RecognitionEvent>),
}

async fn recv_or_pending<T>(rx: Option<&mut UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// The start/stop state machine for one dictation session.
pub struct SessionController<W: Write> {
    options: SessionOptions,
    writer: LineWriter<W>,
    backend: Arc<dyn SpeechBackend>,
    tap: Box<dyn AudioTap>,
    record: Mutex<SessionRecord>,
    stopped: AtomicBool,
    stream: Option<Box<dyn RecognitionStream>>,
    frames: Option<UnboundedReceiver<CapturedFrame>>,
    events: Option<UnboundedReceiver<RecognitionEvent>>,
}

impl<W: Write> SessionController<W> {
    pub fn new(
        options: SessionOptions,
        writer: LineWriter<W>,
        backend: Arc<dyn SpeechBackend>,
        tap: Box<dyn AudioTap>,
    ) -> Self {
        Self {
            options,
            writer,
            backend,
            tap,
            record: Mutex::new(SessionRecord {
                state: SessionState::Idle,
                last_transcript: String::new(),
                final_emitted: false,
                on_device_active: false,
            }),
            stopped: AtomicBool::new(false),
            stream: None,
            frames: None,
            events: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.record.lock().state
    }

    pub fn on_device_active(&self) -> bool {
        self.record.lock().on_device_active
    }

    /// Start the session: authorization gate, recognizer resolution, stream
    /// open, tap install. Emits READY once capture is live.
    ///
    /// Every failure here is fatal for the process: one ERROR line is
    /// written and the error is returned for the caller to exit non-zero
    /// on. Setup is all-or-nothing; the host retries with a new process.
    pub async fn start(&mut self, authorization: AuthorizationStatus) -> Result<()> {
        self.record.lock().state = SessionState::Starting;

        if authorization != AuthorizationStatus::Authorized {
            return self.fail(format!(
                "Speech capture not authorized (status: {})",
                authorization.as_str()
            ));
        }

        let resolution = match self
            .backend
            .resolve(&self.options.language, self.options.prefer_on_device)
        {
            Ok(resolution) => resolution,
            Err(e) => return self.fail(e.to_string()),
        };

        let request = StreamRequest {
            locale: self.options.language.clone(),
            on_device: resolution.on_device_active,
            report_partials: true,
            format: self.tap.format(),
        };

        let (stream, events) = match self.backend.open(request).await {
            Ok(pair) => pair,
            Err(e) => return self.fail(format!("Failed to open recognition stream: {}", e)),
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let on_frame: FrameCallback = Arc::new(move |captured| {
            // Audio thread: hand off and return.
            let _ = frame_tx.send(captured);
        });

        if let Err(e) = self.tap.install(on_frame) {
            stream.cancel();
            return self.fail(format!("Audio capture failed to start: {}", e));
        }

        self.stream = Some(stream);
        self.frames = Some(frame_rx);
        self.events = Some(events);

        {
            let mut record = self.record.lock();
            record.state = SessionState::Listening;
            record.on_device_active = resolution.on_device_active;
        }

        info!(
            "Listening: {} (on_device={})",
            self.options.language, resolution.on_device_active
        );
        self.writer.write(&ProtocolLine::Ready).context("write READY")?;

        Ok(())
    }

    /// Forward the next audio frame or recognition event.
    ///
    /// Returns false once both sources have closed. Cancel-safe, so it can
    /// race signal futures in a select loop.
    pub async fn pump(&mut self) -> Result<bool> {
        if self.frames.is_none() && self.events.is_none() {
            return Ok(false);
        }

        let step = {
            let frames = self.frames.as_mut();
            let events = self.events.as_mut();
            tokio::select! {
                maybe = recv_or_pending(frames) => Step::Frame(maybe),
                maybe = recv_or_pending(events) => Step::Event(maybe),
            }
        };

        match step {
            Step::Frame(Some(captured)) => self.on_frame(captured)?,
            Step::Frame(None) => self.frames = None,
            Step::Event(Some(event)) => self.on_event(event)?,
            Step::Event(None) => self.events = None,
        }

        Ok(self.frames.is_some() || self.events.is_some())
    }

    /// Tear the session down. Idempotent: only the first call acts, no
    /// matter how many signals or callers race into it.
    pub fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping session");
        self.record.lock().state = SessionState::Stopping;

        self.tap.remove();

        if let Some(stream) = self.stream.as_ref() {
            stream.finish();
            stream.cancel();
        }

        let closing = {
            let mut record = self.record.lock();
            if !record.final_emitted && !record.last_transcript.is_empty() {
                record.final_emitted = true;
                Some(record.last_transcript.clone())
            } else {
                None
            }
        };

        if let Some(text) = closing {
            if let Err(e) = self.writer.write(&ProtocolLine::Final(text)) {
                warn!("Failed to write closing final: {}", e);
            }
        }
    }

    /// Mark the session finished once the grace delay has run out.
    pub fn terminate(&mut self) {
        self.stop();
        self.record.lock().state = SessionState::Terminated;
        debug!("Session terminated");
    }

    fn on_frame(&mut self, captured: CapturedFrame) -> Result<()> {
        // Frames still queued after stop are dropped; the tap is gone.
        if self.record.lock().state != SessionState::Listening {
            return Ok(());
        }

        self.writer
            .write(&ProtocolLine::Level(captured.level))
            .context("write LEVEL")?;

        if let Some(stream) = self.stream.as_ref() {
            stream.append(captured.frame);
        }

        Ok(())
    }

    fn on_event(&mut self, event: RecognitionEvent) -> Result<()> {
        match event {
            RecognitionEvent::Partial(text) => {
                {
                    let mut record = self.record.lock();
                    if record.state != SessionState::Listening {
                        // The stream is logically closed; a stale partial
                        // must not disturb the closing final.
                        return Ok(());
                    }
                    record.last_transcript = text.clone();
                    record.final_emitted = false;
                }
                self.writer
                    .write(&ProtocolLine::Partial(text))
                    .context("write PARTIAL")?;
            }
            RecognitionEvent::Final(text) => {
                {
                    let mut record = self.record.lock();
                    if record.final_emitted && record.last_transcript == text {
                        debug!("Dropping duplicate final");
                        return Ok(());
                    }
                    record.last_transcript = text.clone();
                    record.final_emitted = true;
                }
                self.writer
                    .write(&ProtocolLine::Final(text))
                    .context("write FINAL")?;
            }
            RecognitionEvent::Error(error) => {
                if error.is_cancellation() && self.stopped.load(Ordering::SeqCst) {
                    // The expected consequence of our own stop; not an error
                    // from the host's point of view.
                    debug!("Recognition cancelled by stop");
                } else {
                    warn!("Recognition error: {}", error);
                    self.writer
                        .write(&ProtocolLine::Error(error.to_string()))
                        .context("write ERROR")?;
                }
            }
        }

        Ok(())
    }

    fn fail(&mut self, message: String) -> Result<()> {
        if let Err(e) = self.writer.write(&ProtocolLine::Error(message.clone())) {
            warn!("Failed to write ERROR line: {}", e);
        }
        Err(anyhow!(message))
    }
}
