//! Recording session control
//!
//! This module implements the bounded-duration clip session:
//! - ClipRecorder as the public control surface
//! - Session state machine and teardown ordering
//! - Crop/transpose filter derivation for the encoder

pub mod filter;
pub mod session;
pub mod state;

pub use filter::{FilterSpec, Transpose};
pub use session::{ClipRecorder, RecordingEvent, StopReason};
pub use state::{ClipInfo, ClipQuality, RecorderConfig, RecordingState};
