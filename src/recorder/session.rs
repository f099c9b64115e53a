//! Recording session
//!
//! Orchestrates one bounded-duration recording at a time: resource
//! acquisition on start, the shared sink lock, the max-duration deadline,
//! idempotent teardown, timestamps, and event broadcast.

use crate::capture::audio::AudioCapturePipeline;
use crate::capture::traits::{AudioBackend, FrameFormat};
use crate::capture::video::VideoFrameSink;
use crate::encoder::{
    Encoder, EncoderBackend, EncoderRequest, PcmSink, PcmSinkBackend, RecordingError,
    RecordingResult,
};
use crate::recorder::filter::FilterSpec;
use crate::recorder::state::{ClipInfo, RecorderConfig, RecordingState};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started
    Started {
        clip_id: Uuid,
    },
    /// Recording stopped and the output was finalized
    Stopped {
        info: ClipInfo,
        reason: StopReason,
    },
    /// Non-fatal error while recording
    Error(String),
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The caller requested the stop
    Requested,
    /// The max-duration deadline was reached
    DeadlineReached,
}

/// Sinks owned by the session while recording
///
/// Guarded by the single session lock. Both slots are `None` outside the
/// recording window, so late deliveries are dropped rather than misdirected.
pub(crate) struct SinkSlot {
    encoder: Option<Box<dyn Encoder>>,
    tap: Option<Box<dyn PcmSink>>,
}

/// Bookkeeping established by `start()` and consumed by `stop()`
struct ActiveClip {
    id: Uuid,
    path: PathBuf,
    started: Instant,
    max_duration: Duration,
}

/// Unix timestamps of the most recent session, persisting past its stop
#[derive(Default)]
struct SessionTimes {
    unix_start_ms: Option<u64>,
    unix_stop_ms: Option<u64>,
}

/// State shared between the controller and both ingest pipelines
pub(crate) struct SessionCore {
    state: RwLock<RecordingState>,
    sink: Mutex<SinkSlot>,
    frame: RwLock<FrameFormat>,
    active: RwLock<Option<ActiveClip>>,
    times: RwLock<SessionTimes>,
    audio_worker: Mutex<Option<AudioCapturePipeline>>,
    video_frames: AtomicU64,
    audio_chunks: AtomicU64,
    last_clip: RwLock<Option<ClipInfo>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl SessionCore {
    fn new(frame: FrameFormat) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: RwLock::new(RecordingState::Idle),
            sink: Mutex::new(SinkSlot {
                encoder: None,
                tap: None,
            }),
            frame: RwLock::new(frame),
            active: RwLock::new(None),
            times: RwLock::new(SessionTimes::default()),
            audio_worker: Mutex::new(None),
            video_frames: AtomicU64::new(0),
            audio_chunks: AtomicU64::new(0),
            last_clip: RwLock::new(None),
            event_tx,
        }
    }

    pub(crate) fn state(&self) -> RecordingState {
        *self.state.read()
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    pub(crate) fn frame_format(&self) -> FrameFormat {
        *self.frame.read()
    }

    /// Whether the active session has outlived its max duration
    pub(crate) fn deadline_expired(&self) -> bool {
        self.active
            .read()
            .as_ref()
            .map(|clip| clip.started.elapsed() >= clip.max_duration)
            .unwrap_or(false)
    }

    /// Encode one video frame under the session lock
    ///
    /// The state is re-checked under the lock: a stop claimed after the
    /// caller's check lands here as a silent drop.
    pub(crate) fn forward_video(&self, frame: &[u8]) {
        let mut sink = self.sink.lock();
        if *self.state.read() != RecordingState::Recording {
            return;
        }
        if let Some(encoder) = sink.encoder.as_mut() {
            match encoder.encode_video(frame) {
                Ok(()) => {
                    self.video_frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("Video encode failed: {}", e);
                    let _ = self
                        .event_tx
                        .send(RecordingEvent::Error(format!("video encode failed: {e}")));
                }
            }
        }
    }

    /// Forward one audio chunk to the encoder and the tap under the session lock
    pub(crate) fn forward_audio(&self, chunk: &[u8]) {
        let mut sink = self.sink.lock();
        if *self.state.read() != RecordingState::Recording {
            return;
        }
        if let Some(encoder) = sink.encoder.as_mut() {
            match encoder.encode_audio(chunk) {
                Ok(()) => {
                    self.audio_chunks.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("Audio encode failed: {}", e);
                    let _ = self
                        .event_tx
                        .send(RecordingEvent::Error(format!("audio encode failed: {e}")));
                }
            }
        }
        if let Some(tap) = sink.tap.as_mut() {
            if let Err(e) = tap.write(chunk) {
                tracing::warn!("Audio tap write failed: {}", e);
            }
        }
    }

    /// Stop the active session, tearing down exactly once
    ///
    /// The first caller to claim the Recording -> Stopping transition owns
    /// the whole teardown; every other caller gets `None`. Callable from the
    /// controller or from the frame path on deadline expiry.
    pub(crate) fn stop(&self, reason: StopReason) -> Option<ClipInfo> {
        {
            let mut state = self.state.write();
            if *state != RecordingState::Recording {
                return None;
            }
            *state = RecordingState::Stopping;
        }

        tracing::info!("Stopping recording ({:?})", reason);
        let unix_stop_ms = Utc::now().timestamp_millis() as u64;

        // Join the audio worker before touching the sinks so no forward can
        // race the closes below.
        if let Some(worker) = self.audio_worker.lock().take() {
            worker.stop();
        }

        {
            let mut sink = self.sink.lock();
            if let Some(mut tap) = sink.tap.take() {
                if let Err(e) = tap.close() {
                    tracing::warn!("Audio tap close failed: {}", e);
                }
            }
            if let Some(mut encoder) = sink.encoder.take() {
                if let Err(e) = encoder.close() {
                    tracing::warn!("Encoder close failed: {}", e);
                }
            }
        }

        let active = self.active.write().take();
        let unix_start_ms = {
            let mut times = self.times.write();
            times.unix_stop_ms = Some(unix_stop_ms);
            times.unix_start_ms.unwrap_or(unix_stop_ms)
        };

        let info = active.map(|clip| ClipInfo {
            id: clip.id,
            path: clip.path.to_string_lossy().to_string(),
            unix_start_ms,
            unix_stop_ms,
            duration_ms: clip.started.elapsed().as_millis() as u64,
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
        });

        *self.state.write() = RecordingState::Idle;

        if let Some(ref info) = info {
            self.write_sidecar(info);
            *self.last_clip.write() = Some(info.clone());
            let _ = self.event_tx.send(RecordingEvent::Stopped {
                info: info.clone(),
                reason,
            });
            tracing::info!("Recording stopped. Duration: {}ms", info.duration_ms);
        }

        info
    }

    fn write_sidecar(&self, info: &ClipInfo) {
        let sidecar = PathBuf::from(&info.path).with_extension("json");
        match serde_json::to_string_pretty(info) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&sidecar, json) {
                    tracing::warn!("Failed to write clip sidecar {}: {}", sidecar.display(), e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize clip info: {}", e),
        }
    }
}

/// Bounded-duration dual-stream clip recorder
///
/// Owns the configuration and the backends; hands out [`VideoFrameSink`]
/// handles for the frame source and runs the audio capture thread itself.
pub struct ClipRecorder {
    config: RecorderConfig,
    encoder_backend: Box<dyn EncoderBackend>,
    tap_backend: Box<dyn PcmSinkBackend>,
    audio_backend: Box<dyn AudioBackend>,
    core: Arc<SessionCore>,
}

impl ClipRecorder {
    /// Create a recorder over the given backends
    pub fn new(
        config: RecorderConfig,
        encoder_backend: Box<dyn EncoderBackend>,
        tap_backend: Box<dyn PcmSinkBackend>,
        audio_backend: Box<dyn AudioBackend>,
    ) -> Self {
        let core = Arc::new(SessionCore::new(config.frame));
        Self {
            config,
            encoder_backend,
            tap_backend,
            audio_backend,
            core,
        }
    }

    /// Create a recorder over the production backends (FFmpeg, WAV, cpal)
    #[cfg(feature = "microphone")]
    pub fn with_default_backends(config: RecorderConfig) -> Self {
        Self::new(
            config,
            Box::new(crate::encoder::ffmpeg::FfmpegEncoderBackend::new()),
            Box::new(crate::encoder::wav::WavTapBackend),
            Box::new(crate::capture::microphone::CpalAudioBackend::default()),
        )
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        self.core.state()
    }

    /// Whether a recording is currently in progress
    pub fn is_recording(&self) -> bool {
        self.core.is_recording()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.core.event_tx.subscribe()
    }

    /// Handle the frame source pushes video frames into
    pub fn frame_sink(&self) -> VideoFrameSink {
        VideoFrameSink::new(self.core.clone())
    }

    /// Current configuration
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Set the incoming frame geometry; takes effect on the next `start()`
    pub fn set_frame_size(&mut self, width: u32, height: u32) {
        self.config.frame = FrameFormat::new(width, height);
        *self.core.frame.write() = self.config.frame;
    }

    /// Set the encoded output size; takes effect on the next `start()`
    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.config.output_width = width;
        self.config.output_height = height;
    }

    /// Set an explicit filter chain, bypassing the crop derivation
    pub fn set_filters(&mut self, filters: impl Into<String>) {
        self.config.filters = Some(filters.into());
    }

    /// Path of the active clip, or of the last finished one
    pub fn file_path(&self) -> Option<PathBuf> {
        if let Some(clip) = self.core.active.read().as_ref() {
            return Some(clip.path.clone());
        }
        self.core
            .last_clip
            .read()
            .as_ref()
            .map(|info| PathBuf::from(&info.path))
    }

    /// Unix timestamp of the most recent start
    pub fn start_time_ms(&self) -> Option<u64> {
        self.core.times.read().unix_start_ms
    }

    /// Unix timestamp of the most recent stop
    pub fn stop_time_ms(&self) -> Option<u64> {
        self.core.times.read().unix_stop_ms
    }

    /// Recorded duration of the active session, or of the last finished one
    pub fn duration_ms(&self) -> u64 {
        if self.is_recording() {
            return self
                .core
                .active
                .read()
                .as_ref()
                .map(|clip| clip.started.elapsed().as_millis() as u64)
                .unwrap_or(0);
        }
        self.core
            .last_clip
            .read()
            .as_ref()
            .map(|info| info.duration_ms)
            .unwrap_or(0)
    }

    /// Result of the last finished session
    pub fn last_clip(&self) -> Option<ClipInfo> {
        self.core.last_clip.read().clone()
    }

    /// Start recording
    ///
    /// Acquires every resource before the state transition: output path,
    /// encoder, diagnostic tap, audio device and capture thread. On any
    /// failure the already-acquired resources are released and the state is
    /// left untouched.
    pub fn start(&mut self) -> RecordingResult<()> {
        if self.core.state() != RecordingState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }

        std::fs::create_dir_all(&self.config.output_dir)?;

        let unix_start_ms = Utc::now().timestamp_millis() as u64;
        let path = self.config.output_dir.join(format!("clip-{unix_start_ms}.mp4"));
        let filters = self.config.filters.clone().unwrap_or_else(|| {
            FilterSpec::derive(
                &self.config.frame,
                self.config.output_width,
                self.config.output_height,
            )
            .render()
        });

        tracing::info!("Starting recording to: {}", path.display());

        let request = EncoderRequest {
            path: path.clone(),
            frame: self.config.frame,
            output_width: self.config.output_width,
            output_height: self.config.output_height,
            frame_rate: self.config.frame_rate,
            bitrate: self.config.quality.bitrate(),
            compression_level: self.config.quality.compression_level(),
            filters: Some(filters),
            audio: self.config.audio,
        };

        let encoder = self.encoder_backend.open(&request)?;

        let tap = match &self.config.audio_tap_path {
            Some(tap_path) => match self.tap_backend.open(tap_path, &self.config.audio) {
                Ok(tap) => Some(tap),
                Err(e) => {
                    close_quietly(encoder);
                    return Err(e);
                }
            },
            None => None,
        };

        // The worker discards reads until the state flips below, so spawning
        // it last keeps the failure path free of state rollback.
        let worker = match AudioCapturePipeline::start(
            self.audio_backend.as_ref(),
            self.config.audio,
            self.core.clone(),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                if let Some(mut tap) = tap {
                    let _ = tap.close();
                }
                close_quietly(encoder);
                return Err(e);
            }
        };

        let clip_id = Uuid::new_v4();
        {
            let mut sink = self.core.sink.lock();
            sink.encoder = Some(encoder);
            sink.tap = tap;
        }
        self.core.video_frames.store(0, Ordering::Relaxed);
        self.core.audio_chunks.store(0, Ordering::Relaxed);
        *self.core.active.write() = Some(ActiveClip {
            id: clip_id,
            path,
            started: Instant::now(),
            max_duration: Duration::from_millis(self.config.max_duration_ms),
        });
        {
            let mut times = self.core.times.write();
            times.unix_start_ms = Some(unix_start_ms);
            times.unix_stop_ms = None;
        }
        *self.core.audio_worker.lock() = Some(worker);

        *self.core.state.write() = RecordingState::Recording;
        let _ = self.core.event_tx.send(RecordingEvent::Started { clip_id });

        tracing::info!("Recording started");
        Ok(())
    }

    /// Stop recording and finalize the clip
    ///
    /// Returns `None` when no recording is in progress; a second concurrent
    /// stop is a no-op.
    pub fn stop(&mut self) -> Option<ClipInfo> {
        self.core.stop(StopReason::Requested)
    }
}

fn close_quietly(mut encoder: Box<dyn Encoder>) {
    if let Err(e) = encoder.close() {
        tracing::warn!("Encoder close failed during rollback: {}", e);
    }
}
