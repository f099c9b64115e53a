//! Session-level regression tests
//!
//! Exercises the full recording pipeline with instrumented fakes (no capture
//! hardware, no FFmpeg): start/stop ordering, the duration deadline, buffer
//! recycling, teardown idempotence and the event stream.

use cliprec::{
    AudioBackend, AudioDevice, ClipInfo, ClipRecorder, Encoder, EncoderBackend, EncoderRequest,
    FrameFormat, FrameRecycler, PcmSink, PcmSinkBackend, RecorderConfig, RecordingError,
    RecordingEvent, RecordingResult, RecordingState, StopReason,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

// Instrumented encoder: counts calls, flags overlapping or post-close use.

#[derive(Default)]
struct EncoderStats {
    opens: AtomicU64,
    video_frames: AtomicU64,
    audio_chunks: AtomicU64,
    closes: AtomicU64,
    in_call: AtomicBool,
    overlap: AtomicBool,
    closed: AtomicBool,
    encode_after_close: AtomicBool,
}

struct FakeEncoderBackend {
    stats: Arc<EncoderStats>,
    fail_next_open: Arc<AtomicBool>,
    video_encode_fails: bool,
}

impl EncoderBackend for FakeEncoderBackend {
    fn open(&self, _request: &EncoderRequest) -> RecordingResult<Box<dyn Encoder>> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(RecordingError::EncodingError("open refused".to_string()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        self.stats.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeEncoder {
            stats: self.stats.clone(),
            video_encode_fails: self.video_encode_fails,
        }))
    }
}

struct FakeEncoder {
    stats: Arc<EncoderStats>,
    video_encode_fails: bool,
}

impl FakeEncoder {
    fn enter(&self) {
        if self.stats.in_call.swap(true, Ordering::SeqCst) {
            self.stats.overlap.store(true, Ordering::SeqCst);
        }
        if self.stats.closed.load(Ordering::SeqCst) {
            self.stats.encode_after_close.store(true, Ordering::SeqCst);
        }
        // Widen the race window so overlapping calls would be caught.
        thread::sleep(Duration::from_micros(200));
    }

    fn exit(&self) {
        self.stats.in_call.store(false, Ordering::SeqCst);
    }
}

impl Encoder for FakeEncoder {
    fn encode_video(&mut self, _frame: &[u8]) -> RecordingResult<()> {
        self.enter();
        let result = if self.video_encode_fails {
            Err(RecordingError::EncodingError("frame rejected".to_string()))
        } else {
            self.stats.video_frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        self.exit();
        result
    }

    fn encode_audio(&mut self, _chunk: &[u8]) -> RecordingResult<()> {
        self.enter();
        self.stats.audio_chunks.fetch_add(1, Ordering::SeqCst);
        self.exit();
        Ok(())
    }

    fn close(&mut self) -> RecordingResult<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.stats.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// Instrumented PCM tap.

#[derive(Default)]
struct TapStats {
    opens: AtomicU64,
    writes: AtomicU64,
    closes: AtomicU64,
}

struct FakeTapBackend {
    stats: Arc<TapStats>,
    open_fails: bool,
}

impl PcmSinkBackend for FakeTapBackend {
    fn open(
        &self,
        _path: &Path,
        _spec: &cliprec::PcmSpec,
    ) -> RecordingResult<Box<dyn PcmSink>> {
        if self.open_fails {
            return Err(RecordingError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "tap refused",
            )));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTap {
            stats: self.stats.clone(),
        }))
    }
}

struct FakeTap {
    stats: Arc<TapStats>,
}

impl PcmSink for FakeTap {
    fn write(&mut self, _chunk: &[u8]) -> RecordingResult<()> {
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> RecordingResult<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Scripted audio device delivering a chunk every couple of milliseconds.

#[derive(Default)]
struct AudioStats {
    opens: AtomicU64,
    started: AtomicBool,
    stopped: AtomicBool,
    reads: AtomicU64,
}

struct FakeAudioBackend {
    stats: Arc<AudioStats>,
    open_fails: bool,
}

impl AudioBackend for FakeAudioBackend {
    fn min_buffer_size(&self, _spec: &cliprec::PcmSpec) -> usize {
        64
    }

    fn open(&self, _spec: &cliprec::PcmSpec) -> RecordingResult<Box<dyn AudioDevice>> {
        if self.open_fails {
            return Err(RecordingError::DeviceNotFound("fake mic".to_string()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeAudioDevice {
            stats: self.stats.clone(),
        }))
    }
}

struct FakeAudioDevice {
    stats: Arc<AudioStats>,
}

impl AudioDevice for FakeAudioDevice {
    fn start(&mut self) -> RecordingResult<()> {
        self.stats.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> RecordingResult<usize> {
        thread::sleep(Duration::from_millis(2));
        let n = buf.len().min(64);
        for byte in buf[..n].iter_mut() {
            *byte = 0x55;
        }
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    fn stop(&mut self) {
        self.stats.stopped.store(true, Ordering::SeqCst);
    }
}

// Frame buffer recyclers.

#[derive(Default)]
struct CountingRecycler {
    recycled: AtomicU64,
}

impl FrameRecycler for CountingRecycler {
    fn recycle(&self, _buffer: Vec<u8>) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }
}

struct NullRecycler;

impl FrameRecycler for NullRecycler {
    fn recycle(&self, _buffer: Vec<u8>) {}
}

// Harness wiring the fakes into a recorder over a temp directory.

#[derive(Default)]
struct FakeFlags {
    encoder_open_fails_once: bool,
    video_encode_fails: bool,
    tap_open_fails: bool,
    audio_open_fails: bool,
}

struct Harness {
    recorder: ClipRecorder,
    encoder: Arc<EncoderStats>,
    tap: Arc<TapStats>,
    audio: Arc<AudioStats>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with(FakeFlags::default(), |_| {})
}

fn harness_with(flags: FakeFlags, tweak: impl FnOnce(&mut RecorderConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RecorderConfig::new(dir.path());
    config.frame = FrameFormat::new(8, 8);
    tweak(&mut config);

    let encoder = Arc::new(EncoderStats::default());
    let tap = Arc::new(TapStats::default());
    let audio = Arc::new(AudioStats::default());

    let recorder = ClipRecorder::new(
        config,
        Box::new(FakeEncoderBackend {
            stats: encoder.clone(),
            fail_next_open: Arc::new(AtomicBool::new(flags.encoder_open_fails_once)),
            video_encode_fails: flags.video_encode_fails,
        }),
        Box::new(FakeTapBackend {
            stats: tap.clone(),
            open_fails: flags.tap_open_fails,
        }),
        Box::new(FakeAudioBackend {
            stats: audio.clone(),
            open_fails: flags.audio_open_fails,
        }),
    );

    Harness {
        recorder,
        encoder,
        tap,
        audio,
        _dir: dir,
    }
}

fn frame() -> Vec<u8> {
    vec![0u8; FrameFormat::new(8, 8).frame_size()]
}

fn drain(rx: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// Tests.

#[test]
fn test_start_stop_produces_clip_info() {
    let mut h = harness();
    let recycler = CountingRecycler::default();

    assert_eq!(h.recorder.state(), RecordingState::Idle);
    h.recorder.start().unwrap();
    assert!(h.recorder.is_recording());

    let sink = h.recorder.frame_sink();
    for _ in 0..5 {
        sink.on_frame(frame(), &recycler);
        thread::sleep(Duration::from_millis(3));
    }

    let info = h.recorder.stop().expect("clip info");
    assert_eq!(h.recorder.state(), RecordingState::Idle);
    assert_eq!(info.video_frames, 5);
    assert_eq!(
        info.video_frames,
        h.encoder.video_frames.load(Ordering::SeqCst)
    );
    assert_eq!(
        info.audio_chunks,
        h.encoder.audio_chunks.load(Ordering::SeqCst)
    );
    assert!(info.audio_chunks > 0, "audio worker never forwarded");
    assert!(info.path.ends_with(".mp4"));
    assert!(info.unix_stop_ms >= info.unix_start_ms);
    assert_eq!(recycler.recycled.load(Ordering::SeqCst), 5);
    assert_eq!(h.encoder.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.tap.closes.load(Ordering::SeqCst), 1);
    assert!(h.tap.writes.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_clip_sidecar_written() {
    let mut h = harness();
    h.recorder.start().unwrap();
    thread::sleep(Duration::from_millis(10));
    let info = h.recorder.stop().unwrap();

    let sidecar = PathBuf::from(&info.path).with_extension("json");
    let json = std::fs::read_to_string(&sidecar).expect("sidecar exists");
    let loaded: ClipInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded.id, info.id);
    assert_eq!(loaded.duration_ms, info.duration_ms);
}

#[test]
fn test_start_while_recording_is_rejected() {
    let mut h = harness();
    h.recorder.start().unwrap();

    let err = h.recorder.start().unwrap_err();
    assert!(matches!(err, RecordingError::AlreadyRecording));
    assert!(h.recorder.is_recording());
    assert_eq!(h.encoder.opens.load(Ordering::SeqCst), 1);

    assert!(h.recorder.stop().is_some());
}

#[test]
fn test_encoder_open_failure_leaves_recorder_reusable() {
    let mut h = harness_with(
        FakeFlags {
            encoder_open_fails_once: true,
            ..Default::default()
        },
        |_| {},
    );

    let err = h.recorder.start().unwrap_err();
    assert!(matches!(err, RecordingError::EncodingError(_)));
    assert_eq!(h.recorder.state(), RecordingState::Idle);
    assert_eq!(h.audio.opens.load(Ordering::SeqCst), 0, "no audio on failed start");
    assert_eq!(h.tap.opens.load(Ordering::SeqCst), 0);
    assert_eq!(h.recorder.start_time_ms(), None);

    // The same recorder starts cleanly once the backend recovers.
    h.recorder.start().unwrap();
    assert!(h.recorder.is_recording());
    assert!(h.recorder.stop().is_some());
}

#[test]
fn test_tap_open_failure_closes_encoder() {
    let mut h = harness_with(
        FakeFlags {
            tap_open_fails: true,
            ..Default::default()
        },
        |_| {},
    );

    assert!(h.recorder.start().is_err());
    assert_eq!(h.recorder.state(), RecordingState::Idle);
    assert_eq!(h.encoder.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.audio.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn test_audio_open_failure_releases_encoder_and_tap() {
    let mut h = harness_with(
        FakeFlags {
            audio_open_fails: true,
            ..Default::default()
        },
        |_| {},
    );

    let err = h.recorder.start().unwrap_err();
    assert!(matches!(err, RecordingError::DeviceNotFound(_)));
    assert_eq!(h.recorder.state(), RecordingState::Idle);
    assert_eq!(h.encoder.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.tap.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_deadline_stops_on_frame_delivery() {
    let mut h = harness_with(FakeFlags::default(), |config| {
        config.max_duration_ms = 30;
    });
    let mut rx = h.recorder.subscribe();
    let recycler = CountingRecycler::default();

    h.recorder.start().unwrap();
    let sink = h.recorder.frame_sink();

    let mut pushed = 0u64;
    for _ in 0..200 {
        if !h.recorder.is_recording() {
            break;
        }
        sink.on_frame(frame(), &recycler);
        pushed += 1;
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(h.recorder.state(), RecordingState::Idle);
    let info = h.recorder.last_clip().expect("deadline produced a clip");
    assert!(info.duration_ms >= 30);
    // The delivery that crossed the limit is discarded, not encoded.
    assert!(info.video_frames < pushed);
    assert_eq!(recycler.recycled.load(Ordering::SeqCst), pushed);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(RecordingEvent::Started { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        RecordingEvent::Stopped {
            reason: StopReason::DeadlineReached,
            ..
        }
    )));
}

#[test]
fn test_stop_twice_tears_down_once() {
    let mut h = harness();
    h.recorder.start().unwrap();
    thread::sleep(Duration::from_millis(10));

    assert!(h.recorder.stop().is_some());
    assert!(h.recorder.stop().is_none());
    assert_eq!(h.encoder.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.tap.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_frames_outside_recording_are_recycled_unencoded() {
    let mut h = harness();
    let recycler = CountingRecycler::default();
    let sink = h.recorder.frame_sink();

    // Before any start.
    sink.on_frame(frame(), &recycler);
    assert_eq!(recycler.recycled.load(Ordering::SeqCst), 1);

    h.recorder.start().unwrap();
    h.recorder.stop().unwrap();
    let encoded = h.encoder.video_frames.load(Ordering::SeqCst);

    // After the session ended.
    sink.on_frame(frame(), &recycler);
    assert_eq!(recycler.recycled.load(Ordering::SeqCst), 2);
    assert_eq!(h.encoder.video_frames.load(Ordering::SeqCst), encoded);
}

#[test]
fn test_audio_device_released_before_stop_returns() {
    let mut h = harness();
    h.recorder.start().unwrap();
    assert!(h.audio.started.load(Ordering::SeqCst));
    thread::sleep(Duration::from_millis(10));

    h.recorder.stop().unwrap();
    assert!(
        h.audio.stopped.load(Ordering::SeqCst),
        "capture thread must be joined before stop() returns"
    );
}

#[test]
fn test_encode_failure_keeps_session_alive() {
    let mut h = harness_with(
        FakeFlags {
            video_encode_fails: true,
            ..Default::default()
        },
        |_| {},
    );
    let mut rx = h.recorder.subscribe();
    let recycler = CountingRecycler::default();

    h.recorder.start().unwrap();
    let sink = h.recorder.frame_sink();
    sink.on_frame(frame(), &recycler);
    sink.on_frame(frame(), &recycler);

    assert!(h.recorder.is_recording(), "encode errors are not fatal");
    assert_eq!(recycler.recycled.load(Ordering::SeqCst), 2);

    let info = h.recorder.stop().unwrap();
    assert_eq!(info.video_frames, 0);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, RecordingEvent::Error(_))));
}

#[test]
fn test_concurrent_deliveries_never_overlap_in_encoder() {
    let mut h = harness();
    h.recorder.start().unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let sink = h.recorder.frame_sink();
        handles.push(thread::spawn(move || {
            for _ in 0..40 {
                sink.on_frame(frame(), &NullRecycler);
                thread::sleep(Duration::from_millis(1));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let info = h.recorder.stop().unwrap();
    assert!(info.video_frames > 0);
    assert!(info.audio_chunks > 0);
    assert!(
        !h.encoder.overlap.load(Ordering::SeqCst),
        "encoder calls overlapped"
    );
    assert!(!h.encoder.encode_after_close.load(Ordering::SeqCst));
}

#[test]
fn test_accessors_track_active_and_finished_clip() {
    let mut h = harness();
    assert_eq!(h.recorder.file_path(), None);
    assert_eq!(h.recorder.duration_ms(), 0);

    h.recorder.start().unwrap();
    let active_path = h.recorder.file_path().expect("active path");
    assert!(h.recorder.start_time_ms().is_some());
    assert_eq!(h.recorder.stop_time_ms(), None);
    thread::sleep(Duration::from_millis(15));
    assert!(h.recorder.duration_ms() > 0);

    let info = h.recorder.stop().unwrap();
    assert_eq!(h.recorder.file_path(), Some(PathBuf::from(&info.path)));
    assert_eq!(active_path, PathBuf::from(&info.path));
    assert_eq!(h.recorder.duration_ms(), info.duration_ms);
    assert_eq!(h.recorder.stop_time_ms(), Some(info.unix_stop_ms));
    assert_eq!(h.recorder.last_clip().map(|c| c.id), Some(info.id));
}

#[test]
fn test_counters_reset_between_sessions() {
    let mut h = harness();
    let recycler = CountingRecycler::default();

    h.recorder.start().unwrap();
    let sink = h.recorder.frame_sink();
    for _ in 0..4 {
        sink.on_frame(frame(), &recycler);
    }
    let first = h.recorder.stop().unwrap();
    assert_eq!(first.video_frames, 4);

    h.recorder.start().unwrap();
    let sink = h.recorder.frame_sink();
    sink.on_frame(frame(), &recycler);
    let second = h.recorder.stop().unwrap();
    assert_eq!(second.video_frames, 1);
    assert_ne!(first.id, second.id);
}

#[test]
fn test_disabled_tap_skips_sink() {
    let mut h = harness_with(FakeFlags::default(), |config| {
        config.audio_tap_path = None;
    });

    h.recorder.start().unwrap();
    thread::sleep(Duration::from_millis(10));
    h.recorder.stop().unwrap();

    assert_eq!(h.tap.opens.load(Ordering::SeqCst), 0);
    assert_eq!(h.tap.writes.load(Ordering::SeqCst), 0);
}
