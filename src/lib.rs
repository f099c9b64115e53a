//! cliprec - Bounded-duration camera clip recording with synchronized audio.
//!
//! The crate records short fixed-maximum-length clips from an external video
//! frame source while capturing microphone audio on a worker thread. Frames
//! and PCM chunks feed a single FFmpeg-backed encoder; stopping (explicitly
//! or at the duration limit) tears the session down in a fixed order and
//! yields a [`ClipInfo`] describing the finished file.
//!
//! The frame source is push-based: the host obtains a [`VideoFrameSink`] and
//! calls [`VideoFrameSink::on_frame`] from its own delivery thread. Audio is
//! pull-based and owned by the recorder. Both streams meet at one encoder
//! behind a session lock.

pub mod capture;
pub mod encoder;
pub mod recorder;

pub use capture::{
    AudioBackend, AudioDevice, AudioDeviceInfo, FrameBufferPool, FrameFormat, FrameRecycler,
    PcmSpec, VideoFrameSink,
};
pub use encoder::{
    Encoder, EncoderBackend, EncoderRequest, FfmpegEncoderBackend, PcmSink, PcmSinkBackend,
    RecordingError, RecordingResult, WavTapBackend,
};
pub use recorder::{
    ClipInfo, ClipQuality, ClipRecorder, FilterSpec, RecorderConfig, RecordingEvent,
    RecordingState, StopReason, Transpose,
};

#[cfg(feature = "camera")]
pub use capture::{list_cameras, CameraFrameSource, CameraInfo};

#[cfg(feature = "microphone")]
pub use capture::{list_input_devices, CpalAudioBackend};
