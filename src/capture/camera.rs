//! Camera frame source (nokhwa)
//!
//! Owns a capture thread pulling raw frames from a camera and pushing them
//! into a [`VideoFrameSink`] through a frame buffer pool. The camera handle
//! is created inside the thread (platform capture handles are not Send); the
//! negotiated frame geometry is reported back through the open handshake
//! before any frame is delivered.

use crate::capture::traits::FrameFormat;
use crate::capture::video::{FrameBufferPool, VideoFrameSink};
use crate::encoder::{RecordingError, RecordingResult};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

const POOL_CAPACITY: usize = 1;

/// Information about a camera device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,
}

/// List available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// A running camera delivering frames into a session's frame sink
pub struct CameraFrameSource {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraFrameSource {
    /// Open the camera and start delivering frames into `sink`
    ///
    /// Returns once the camera stream is up, together with the negotiated
    /// frame geometry, so the recorder can be configured before its
    /// `start()`. Frames delivered while the session is idle are recycled
    /// untouched.
    pub fn start(
        device_id: Option<String>,
        sink: VideoFrameSink,
    ) -> RecordingResult<(Self, FrameFormat)> {
        let camera_index = match &device_id {
            Some(id) => id
                .parse::<u32>()
                .map(CameraIndex::Index)
                .unwrap_or_else(|_| CameraIndex::String(id.clone())),
            None => CameraIndex::Index(0),
        };

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<FrameFormat, String>>();

        let handle = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_frames(camera_index, sink, ready_tx, flag))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => Ok((
                Self {
                    running,
                    handle: Some(handle),
                },
                format,
            )),
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(RecordingError::CaptureError(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(RecordingError::CaptureError(
                    "Camera thread exited during setup".to_string(),
                ))
            }
        }
    }

    /// Stop the capture thread and release the camera
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn capture_frames(
    camera_index: CameraIndex,
    sink: VideoFrameSink,
    ready: Sender<Result<FrameFormat, String>>,
    running: Arc<AtomicBool>,
) {
    // Ask for the best the device offers; the session adapts to the actual
    // geometry reported back through the handshake.
    let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);

    let mut camera = match Camera::new(camera_index.clone(), requested) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(format!("Failed to open camera {camera_index:?}: {e:?}")));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(format!("Failed to open camera stream: {e:?}")));
        return;
    }

    let camera_format = camera.camera_format();
    let format = FrameFormat {
        width: camera_format.resolution().width(),
        height: camera_format.resolution().height(),
        bits_per_pixel: bits_per_pixel(camera_format.format()),
    };
    let pool = FrameBufferPool::new(format, POOL_CAPACITY);
    let _ = ready.send(Ok(format));

    tracing::info!(
        "Camera opened: {}x{} @ {}fps, format={:?}",
        format.width,
        format.height,
        camera_format.frame_rate(),
        camera_format.format(),
    );

    while running.load(Ordering::SeqCst) {
        // Blocks until the camera delivers the next frame; the camera
        // controls the pacing.
        match camera.frame() {
            Ok(frame) => {
                let raw = frame.buffer();
                let mut buffer = pool.acquire();
                // Compressed sources (MJPEG) deliver variable-size frames.
                buffer.clear();
                buffer.extend_from_slice(raw);
                sink.on_frame(buffer, &pool);
            }
            Err(e) => {
                tracing::debug!("Failed to capture frame: {:?}", e);
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
    tracing::debug!("Camera capture thread stopped");
}

/// Raw bits per pixel of a camera pixel layout
fn bits_per_pixel(format: nokhwa::utils::FrameFormat) -> u32 {
    match format {
        nokhwa::utils::FrameFormat::YUYV => 16,
        nokhwa::utils::FrameFormat::NV12 => 12,
        nokhwa::utils::FrameFormat::RAWRGB => 24,
        _ => 16,
    }
}
