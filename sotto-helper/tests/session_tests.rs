//! Session controller behavior against scripted capture and recognition.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use sotto_audio::{
    input_level, AudioError, AudioFormat, AudioFrame, AudioTap, CapturedFrame, FrameCallback,
};
use sotto_helper::authorization::AuthorizationStatus;
use sotto_helper::session::{SessionController, SessionOptions, SessionState};
use sotto_protocol::LineWriter;
use sotto_recognition::{
    Capabilities, RecognitionError, RecognitionEvent, RecognitionStream, Resolution, SpeechBackend,
    StreamRequest,
};

const FORMAT: AudioFormat = AudioFormat {
    sample_rate: 48000,
    channels: 1,
};

/// Write target the test can read back line by line.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn count_prefixed(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Tap stand-in: records install/remove calls, lets the test push frames the
/// way the audio thread would.
struct ScriptedTap {
    callback: Arc<Mutex<Option<FrameCallback>>>,
    removals: Arc<AtomicUsize>,
    fail_install: bool,
}

#[derive(Clone)]
struct TapProbe {
    callback: Arc<Mutex<Option<FrameCallback>>>,
    removals: Arc<AtomicUsize>,
}

impl TapProbe {
    fn push_frame(&self, samples: Vec<f32>) {
        let callback = self.callback.lock().clone().expect("tap not installed");
        let level = input_level(&samples, FORMAT.channels);
        callback(CapturedFrame {
            frame: AudioFrame {
                samples,
                format: FORMAT,
            },
            level,
        });
    }

    fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

fn scripted_tap(fail_install: bool) -> (ScriptedTap, TapProbe) {
    let callback = Arc::new(Mutex::new(None));
    let removals = Arc::new(AtomicUsize::new(0));
    let tap = ScriptedTap {
        callback: Arc::clone(&callback),
        removals: Arc::clone(&removals),
        fail_install,
    };
    (tap, TapProbe { callback, removals })
}

impl AudioTap for ScriptedTap {
    fn format(&self) -> AudioFormat {
        FORMAT
    }

    fn install(&mut self, on_frame: FrameCallback) -> sotto_audio::Result<()> {
        if self.fail_install {
            return Err(AudioError::stream("scripted install failure"));
        }
        *self.callback.lock() = Some(on_frame);
        Ok(())
    }

    fn remove(&mut self) {
        self.removals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stream stand-in counting control calls.
#[derive(Default)]
struct StreamProbe {
    appends: AtomicUsize,
    finishes: AtomicUsize,
    cancels: AtomicUsize,
}

struct ScriptedStream {
    probe: Arc<StreamProbe>,
}

impl RecognitionStream for ScriptedStream {
    fn append(&self, _frame: AudioFrame) {
        self.probe.appends.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.probe.finishes.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.probe.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend stand-in: capability-table resolution, channel-backed stream.
struct ScriptedBackend {
    capabilities: Capabilities,
    event_slot: Arc<Mutex<Option<UnboundedSender<RecognitionEvent>>>>,
    probe: Arc<StreamProbe>,
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    fn resolve(
        &self,
        locale: &str,
        prefer_on_device: bool,
    ) -> sotto_recognition::Result<Resolution> {
        if !self.capabilities.supports_locale(locale) {
            return Err(RecognitionError::RecognizerUnavailable(locale.to_string()));
        }
        Ok(Resolution {
            on_device_active: prefer_on_device && self.capabilities.supports_on_device(locale),
        })
    }

    async fn open(
        &self,
        _request: StreamRequest,
    ) -> sotto_recognition::Result<(Box<dyn RecognitionStream>, UnboundedReceiver<RecognitionEvent>)>
    {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.event_slot.lock() = Some(tx);
        Ok((
            Box::new(ScriptedStream {
                probe: Arc::clone(&self.probe),
            }),
            rx,
        ))
    }
}

struct Harness {
    controller: SessionController<SharedBuf>,
    output: SharedBuf,
    tap: TapProbe,
    events: Arc<Mutex<Option<UnboundedSender<RecognitionEvent>>>>,
    stream: Arc<StreamProbe>,
}

impl Harness {
    fn new(options: SessionOptions, capabilities: Capabilities) -> Self {
        Self::with_tap_failure(options, capabilities, false)
    }

    fn with_tap_failure(
        options: SessionOptions,
        capabilities: Capabilities,
        fail_install: bool,
    ) -> Self {
        let output = SharedBuf::default();
        let (tap, tap_probe) = scripted_tap(fail_install);
        let event_slot = Arc::new(Mutex::new(None));
        let stream_probe = Arc::new(StreamProbe::default());
        let backend = Arc::new(ScriptedBackend {
            capabilities,
            event_slot: Arc::clone(&event_slot),
            probe: Arc::clone(&stream_probe),
        });

        let controller = SessionController::new(
            options,
            LineWriter::new(output.clone()),
            backend,
            Box::new(tap),
        );

        Self {
            controller,
            output,
            tap: tap_probe,
            events: event_slot,
            stream: stream_probe,
        }
    }

    fn send_event(&self, event: RecognitionEvent) {
        self.events
            .lock()
            .as_ref()
            .expect("stream not opened")
            .send(event)
            .unwrap();
    }

    /// Pump until the controller has nothing queued.
    async fn drain(&mut self) {
        loop {
            match tokio::time::timeout(Duration::from_millis(50), self.controller.pump()).await {
                Ok(Ok(true)) => continue,
                Ok(Ok(false)) => break,
                Ok(Err(e)) => panic!("pump error: {e}"),
                Err(_) => break,
            }
        }
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        language: "en-US".to_string(),
        prefer_on_device: false,
    }
}

#[tokio::test]
async fn test_ready_then_levels_and_partials_flow() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();
    assert_eq!(harness.controller.state(), SessionState::Listening);

    // mean(|0.05|) * 10 = 0.5
    harness.tap.push_frame(vec![0.05; 1024]);
    harness.send_event(RecognitionEvent::Partial("hel".to_string()));
    harness.drain().await;

    let lines = harness.output.lines();
    assert_eq!(lines[0], "READY");
    assert!(lines.contains(&"LEVEL:0.500".to_string()));
    assert!(lines.contains(&"PARTIAL:hel".to_string()));
    assert_eq!(harness.stream.appends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_level_lines_stay_in_bounds() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    // Raw amplitude x10 would be 10.0; the line must clamp to 1.000.
    harness.tap.push_frame(vec![1.0; 1024]);
    harness.tap.push_frame(vec![0.0; 1024]);
    harness.drain().await;

    let lines = harness.output.lines();
    assert!(lines.contains(&"LEVEL:1.000".to_string()));
    assert!(lines.contains(&"LEVEL:0.000".to_string()));
    for line in lines.iter().filter(|l| l.starts_with("LEVEL:")) {
        let value: f32 = line.strip_prefix("LEVEL:").unwrap().parse().unwrap();
        assert!((0.0..=1.0).contains(&value), "out of range: {line}");
        assert_eq!(line.len(), "LEVEL:".len() + 5, "not 3-decimal: {line}");
    }
}

#[tokio::test]
async fn test_stop_after_partial_emits_closing_final() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Partial("hello".to_string()));
    harness.drain().await;

    harness.controller.stop();

    let lines = harness.output.lines();
    assert_eq!(lines.last().unwrap(), "FINAL:hello");
    assert_eq!(harness.output.count_prefixed("FINAL:"), 1);
}

#[tokio::test]
async fn test_stop_does_not_duplicate_final() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Final("hello".to_string()));
    harness.drain().await;

    harness.controller.stop();

    assert_eq!(harness.output.count_prefixed("FINAL:hello"), 1);
}

#[tokio::test]
async fn test_stop_without_transcript_emits_no_final() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.controller.stop();

    assert_eq!(harness.output.count_prefixed("FINAL:"), 0);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Partial("hello".to_string()));
    harness.drain().await;

    // SIGINT and SIGTERM can both land; the teardown must run once.
    harness.controller.stop();
    harness.controller.stop();
    harness.controller.stop();

    assert_eq!(harness.tap.removals(), 1);
    assert_eq!(harness.stream.finishes.load(Ordering::SeqCst), 1);
    assert_eq!(harness.stream.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(harness.output.count_prefixed("FINAL:"), 1);
}

#[tokio::test]
async fn test_multiple_finals_are_each_forwarded() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Final("first segment.".to_string()));
    harness.send_event(RecognitionEvent::Final("second segment.".to_string()));
    harness.drain().await;

    let lines = harness.output.lines();
    assert!(lines.contains(&"FINAL:first segment.".to_string()));
    assert!(lines.contains(&"FINAL:second segment.".to_string()));
    assert_eq!(harness.controller.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_on_device_fallback_is_silent() {
    let mut harness = Harness::new(
        SessionOptions {
            language: "en-US".to_string(),
            prefer_on_device: true,
        },
        // No on-device support declared for any locale.
        Capabilities::default(),
    );

    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    assert_eq!(harness.output.lines(), vec!["READY".to_string()]);
    assert!(!harness.controller.on_device_active());
}

#[tokio::test]
async fn test_on_device_used_when_supported() {
    let mut harness = Harness::new(
        SessionOptions {
            language: "en-US".to_string(),
            prefer_on_device: true,
        },
        Capabilities {
            locales: Vec::new(),
            on_device_locales: vec!["en-US".to_string()],
        },
    );

    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    assert!(harness.controller.on_device_active());
}

#[tokio::test]
async fn test_cancellation_after_stop_is_swallowed() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.controller.stop();
    harness.send_event(RecognitionEvent::Error(RecognitionError::Cancelled));
    harness.drain().await;

    assert_eq!(harness.output.count_prefixed("ERROR:"), 0);
}

#[tokio::test]
async fn test_cancellation_without_stop_is_surfaced() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Error(RecognitionError::Cancelled));
    harness.drain().await;

    assert_eq!(harness.output.count_prefixed("ERROR:"), 1);
}

#[tokio::test]
async fn test_runtime_error_is_surfaced_and_session_continues() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Error(RecognitionError::stream(
        "recognizer overloaded",
    )));
    harness.send_event(RecognitionEvent::Partial("still here".to_string()));
    harness.drain().await;

    let lines = harness.output.lines();
    assert!(lines
        .iter()
        .any(|l| l.starts_with("ERROR:") && l.contains("recognizer overloaded")));
    assert!(lines.contains(&"PARTIAL:still here".to_string()));
    assert_eq!(harness.controller.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_unavailable_locale_is_fatal() {
    let mut harness = Harness::new(
        SessionOptions {
            language: "xx-XX".to_string(),
            prefer_on_device: false,
        },
        Capabilities {
            locales: vec!["en-US".to_string()],
            on_device_locales: Vec::new(),
        },
    );

    let result = harness.controller.start(AuthorizationStatus::Authorized).await;
    assert!(result.is_err());

    let lines = harness.output.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ERROR:"));
    assert!(!lines.contains(&"READY".to_string()));
}

#[tokio::test]
async fn test_denied_authorization_is_fatal() {
    let mut harness = Harness::new(options(), Capabilities::default());

    let result = harness.controller.start(AuthorizationStatus::Denied).await;
    assert!(result.is_err());

    let lines = harness.output.lines();
    assert_eq!(harness.output.count_prefixed("ERROR:"), 1);
    assert!(!lines.contains(&"READY".to_string()));
}

#[tokio::test]
async fn test_tap_install_failure_is_fatal_and_cancels_stream() {
    let mut harness =
        Harness::with_tap_failure(options(), Capabilities::default(), true);

    let result = harness.controller.start(AuthorizationStatus::Authorized).await;
    assert!(result.is_err());

    assert_eq!(harness.output.count_prefixed("ERROR:"), 1);
    assert_eq!(harness.stream.cancels.load(Ordering::SeqCst), 1);
    assert!(!harness.output.lines().contains(&"READY".to_string()));
}

#[tokio::test]
async fn test_late_final_after_stop_is_forwarded_once() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.send_event(RecognitionEvent::Partial("hello".to_string()));
    harness.drain().await;

    harness.controller.stop();
    assert_eq!(harness.output.count_prefixed("FINAL:hello"), 1);

    // A final that was in flight when stop cancelled the stream: delivered
    // during the grace delay, still forwarded because the text advanced.
    harness.send_event(RecognitionEvent::Final("hello world".to_string()));
    // And a duplicate of it must not produce a second line.
    harness.send_event(RecognitionEvent::Final("hello world".to_string()));
    harness.drain().await;

    assert_eq!(harness.output.count_prefixed("FINAL:hello world"), 1);

    harness.controller.terminate();
    assert_eq!(harness.controller.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_frames_after_stop_are_dropped() {
    let mut harness = Harness::new(options(), Capabilities::default());
    harness
        .controller
        .start(AuthorizationStatus::Authorized)
        .await
        .unwrap();

    harness.controller.stop();
    harness.tap.push_frame(vec![0.5; 1024]);
    harness.drain().await;

    assert_eq!(harness.output.count_prefixed("LEVEL:"), 0);
    assert_eq!(harness.stream.appends.load(Ordering::SeqCst), 0);
}
