//! Encoder and writer boundary
//!
//! Defines the interfaces the recording session drives: the audio/video
//! encoder and the diagnostic PCM writer. Production implementations live in
//! the submodules; tests substitute instrumented fakes.

pub mod ffmpeg;
pub mod wav;

pub use ffmpeg::FfmpegEncoderBackend;
pub use wav::WavTapBackend;

use crate::capture::traits::{FrameFormat, PcmSpec};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Capture error: {0}")]
    CaptureError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Everything an encoder needs to open a session output
#[derive(Debug, Clone)]
pub struct EncoderRequest {
    /// Final output file path
    pub path: PathBuf,

    /// Incoming frame geometry
    pub frame: FrameFormat,

    /// Encoded output width in pixels
    pub output_width: u32,

    /// Encoded output height in pixels
    pub output_height: u32,

    /// Video frame rate
    pub frame_rate: u32,

    /// Video bitrate in bits per second
    pub bitrate: u32,

    /// Compression level (0 = slowest/smallest, 9 = fastest/largest)
    pub compression_level: u8,

    /// Filter chain applied before scaling (crop/transpose)
    pub filters: Option<String>,

    /// Incoming PCM format
    pub audio: PcmSpec,
}

/// An open encoder accepting interleaved video frames and audio chunks
///
/// One instance lives for exactly one recording session. All calls are made
/// under the session lock, so implementations need no internal synchronization.
pub trait Encoder: Send {
    /// Encode one raw video frame
    fn encode_video(&mut self, frame: &[u8]) -> RecordingResult<()>;

    /// Encode one chunk of raw PCM audio
    fn encode_audio(&mut self, chunk: &[u8]) -> RecordingResult<()>;

    /// Flush and finalize the output file
    fn close(&mut self) -> RecordingResult<()>;
}

/// Factory opening a fresh [`Encoder`] per session
pub trait EncoderBackend: Send + Sync {
    fn open(&self, request: &EncoderRequest) -> RecordingResult<Box<dyn Encoder>>;
}

/// A raw PCM sink written in parallel with the encoder (diagnostic tap)
pub trait PcmSink: Send {
    /// Append one chunk of raw PCM
    fn write(&mut self, chunk: &[u8]) -> RecordingResult<()>;

    /// Finalize the sink (e.g. patch up container headers)
    fn close(&mut self) -> RecordingResult<()>;
}

/// Factory opening a fresh [`PcmSink`] per session
pub trait PcmSinkBackend: Send + Sync {
    fn open(&self, path: &Path, spec: &PcmSpec) -> RecordingResult<Box<dyn PcmSink>>;
}
