//! Recording state and configuration
//!
//! Defines the session state machine states, the recorder configuration, and
//! the per-clip result record.

use crate::capture::traits::{FrameFormat, PcmSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Current state of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    Idle,
    /// Currently recording
    Recording,
    /// Teardown in progress on the stopping thread
    Stopping,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Encoding quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipQuality {
    Low,
    Medium,
    High,
}

impl ClipQuality {
    /// Video bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        match self {
            ClipQuality::Low => 300_000,
            ClipQuality::Medium => 600_000,
            ClipQuality::High => 1_200_000,
        }
    }

    /// Compression level (0 = slowest/smallest, 9 = fastest/largest)
    pub fn compression_level(&self) -> u8 {
        match self {
            ClipQuality::Low => 7,
            ClipQuality::Medium => 5,
            ClipQuality::High => 3,
        }
    }
}

/// Configuration for a clip recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Directory clips are written into
    pub output_dir: PathBuf,

    /// Geometry of the raw frames the source will deliver
    pub frame: FrameFormat,

    /// Encoded output width in pixels
    pub output_width: u32,

    /// Encoded output height in pixels
    pub output_height: u32,

    /// Video frame rate
    pub frame_rate: u32,

    /// Hard cap on recording duration; frames past it trigger auto-stop
    pub max_duration_ms: u64,

    /// Encoding quality preset
    pub quality: ClipQuality,

    /// Raw PCM format captured from the audio device
    pub audio: PcmSpec,

    /// Explicit filter chain; when set, the crop derivation is skipped
    pub filters: Option<String>,

    /// Destination of the diagnostic raw-audio tap; `None` disables it
    pub audio_tap_path: Option<PathBuf>,
}

impl RecorderConfig {
    /// Default configuration writing into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let audio_tap_path = Some(output_dir.join("audio-tap.wav"));
        Self {
            output_dir,
            frame: FrameFormat::default(),
            output_width: 480,
            output_height: 480,
            frame_rate: 30,
            max_duration_ms: 6000,
            quality: ClipQuality::Medium,
            audio: PcmSpec::default(),
            filters: None,
            audio_tap_path,
        }
    }
}

/// Result record for one completed clip
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipInfo {
    /// Unique clip ID
    pub id: Uuid,

    /// Path to the encoded output file
    pub path: String,

    /// Unix timestamp when recording started
    pub unix_start_ms: u64,

    /// Unix timestamp when recording stopped
    pub unix_stop_ms: u64,

    /// Recorded duration in milliseconds
    pub duration_ms: u64,

    /// Number of video frames encoded
    pub video_frames: u64,

    /// Number of audio chunks forwarded
    pub audio_chunks: u64,
}
