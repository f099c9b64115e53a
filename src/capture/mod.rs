//! Capture-side pipeline
//!
//! This module covers everything that produces media for a session:
//! - Frame buffer pooling and the video frame sink
//! - The audio capture worker thread
//! - Device backends (cpal microphone input, nokhwa cameras)

pub mod audio;
pub mod traits;
pub mod video;

#[cfg(feature = "camera")]
pub mod camera;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use traits::{AudioBackend, AudioDevice, AudioDeviceInfo, FrameFormat, PcmSpec};
pub use video::{FrameBufferPool, FrameRecycler, VideoFrameSink};

#[cfg(feature = "camera")]
pub use camera::{list_cameras, CameraFrameSource, CameraInfo};

#[cfg(feature = "microphone")]
pub use microphone::{list_input_devices, CpalAudioBackend};
