//! Capture trait definitions
//!
//! Backend-agnostic types and traits for the capture side: frame geometry,
//! PCM formats, and the pull-style audio input device boundary.

use crate::encoder::RecordingResult;
use serde::{Deserialize, Serialize};

/// Geometry and layout of the raw video frames a source delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameFormat {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Bits per pixel of the raw layout (12 for 4:2:0 preview frames)
    pub bits_per_pixel: u32,
}

impl FrameFormat {
    /// A 4:2:0 frame of the given dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits_per_pixel: 12,
        }
    }

    /// Size of one raw frame in bytes
    pub fn frame_size(&self) -> usize {
        (self.width as usize * self.height as usize * self.bits_per_pixel as usize) / 8
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

/// Raw PCM format produced by the audio device and consumed by the sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmSpec {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Bits per sample (16)
    pub bits_per_sample: u16,

    /// Number of interleaved channels (1 = mono)
    pub channels: u16,
}

impl Default for PcmSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bits_per_sample: 16,
            channels: 1,
        }
    }
}

impl PcmSpec {
    /// Bytes of PCM per second of audio
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * (self.bits_per_sample / 8) as usize
    }

    /// Buffer size in bytes for the given duration
    pub fn buffer_size_bytes(&self, duration_ms: u32) -> usize {
        let samples = (self.sample_rate * duration_ms) / 1000;
        samples as usize * self.channels as usize * (self.bits_per_sample / 8) as usize
    }
}

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is the default device
    pub is_default: bool,
}

/// An open audio input device read by the capture loop
///
/// Reads block until data is available or a backend-chosen timeout elapses
/// (a timeout is reported as a zero-length read). Implementations release
/// their platform resources on drop.
pub trait AudioDevice: Send {
    /// Begin delivering samples
    fn start(&mut self) -> RecordingResult<()>;

    /// Read up to `buf.len()` bytes of PCM, returning the byte count
    fn read(&mut self, buf: &mut [u8]) -> RecordingResult<usize>;

    /// Stop delivering samples
    fn stop(&mut self);
}

/// Factory opening a fresh [`AudioDevice`] per session
pub trait AudioBackend: Send + Sync {
    /// Smallest read buffer the device supports for this format
    fn min_buffer_size(&self, spec: &PcmSpec) -> usize;

    /// Open the device for the given format
    fn open(&self, spec: &PcmSpec) -> RecordingResult<Box<dyn AudioDevice>>;
}
