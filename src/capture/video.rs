//! Video ingest path
//!
//! The frame buffer pool, the buffer-return boundary, and the sink a frame
//! source pushes into. Deliveries run on the source's callback thread; the
//! sink never panics into the caller and never blocks beyond one
//! lock-protected encode.

use crate::capture::traits::FrameFormat;
use crate::recorder::session::{SessionCore, StopReason};
use parking_lot::Mutex;
use std::sync::Arc;

/// Buffer-return boundary of a frame source
///
/// Every buffer delivered to [`VideoFrameSink::on_frame`] is handed back
/// through this exactly once, regardless of session state or encode outcome.
pub trait FrameRecycler: Send + Sync {
    fn recycle(&self, buffer: Vec<u8>);
}

/// Pool of fixed-size raw frame buffers shared with the capture source
pub struct FrameBufferPool {
    format: FrameFormat,
    free: Mutex<Vec<Vec<u8>>>,
}

impl FrameBufferPool {
    /// Pre-allocate `capacity` buffers of the format's frame size
    pub fn new(format: FrameFormat, capacity: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0u8; format.frame_size()])
            .collect();
        Self {
            format,
            free: Mutex::new(free),
        }
    }

    /// Geometry the pool allocates for
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Number of buffers currently available
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Take a buffer, allocating a fresh one when the pool is empty
    pub fn acquire(&self) -> Vec<u8> {
        let mut buffer = self.free.lock().pop().unwrap_or_default();
        buffer.resize(self.format.frame_size(), 0);
        buffer
    }
}

impl FrameRecycler for FrameBufferPool {
    fn recycle(&self, buffer: Vec<u8>) {
        // Buffers too small for the session geometry are dropped here and
        // replaced lazily by acquire().
        if buffer.capacity() >= self.format.frame_size() {
            self.free.lock().push(buffer);
        }
    }
}

/// Ingest adapter between an externally-owned frame callback and the session
///
/// Cheap to clone; every clone feeds the same session.
#[derive(Clone)]
pub struct VideoFrameSink {
    core: Arc<SessionCore>,
}

impl VideoFrameSink {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Geometry the session expects, for sizing the buffer pool
    pub fn frame_format(&self) -> FrameFormat {
        self.core.frame_format()
    }

    /// Deliver one raw frame from the source's callback thread
    ///
    /// Outside the recording window the frame is discarded. On deadline
    /// expiry the session is stopped synchronously and the over-limit frame
    /// is discarded un-encoded. The buffer goes back to `source` on every
    /// path.
    pub fn on_frame(&self, frame: Vec<u8>, source: &dyn FrameRecycler) {
        if !self.core.is_recording() {
            source.recycle(frame);
            return;
        }

        if self.core.deadline_expired() {
            self.core.stop(StopReason::DeadlineReached);
            source.recycle(frame);
            return;
        }

        self.core.forward_video(&frame);
        source.recycle(frame);
    }
}
