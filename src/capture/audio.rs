//! Audio capture loop
//!
//! Owns the background thread that reads the audio input device and forwards
//! filled chunks into the session. Device reads happen outside the session
//! lock; only the forwarding of a filled chunk takes it.

use crate::capture::traits::{AudioBackend, AudioDevice, PcmSpec};
use crate::encoder::RecordingResult;
use crate::recorder::session::SessionCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle to the running capture thread of one session
pub(crate) struct AudioCapturePipeline {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioCapturePipeline {
    /// Open the device and spawn the capture thread
    ///
    /// Open failure surfaces here, on the caller's thread, so session start
    /// fails before any state transition. The spawned loop discards reads
    /// until the session enters the recording state.
    pub(crate) fn start(
        backend: &dyn AudioBackend,
        spec: PcmSpec,
        core: Arc<SessionCore>,
    ) -> RecordingResult<Self> {
        let buffer_size = backend.min_buffer_size(&spec).max(1);
        let mut device = backend.open(&spec)?;
        device.start()?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_loop(device, buffer_size, flag, core))?;

        tracing::info!(
            "Audio capture started: {}Hz {}ch, {} byte buffer",
            spec.sample_rate,
            spec.channels,
            buffer_size
        );

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Signal the loop to exit and join the thread
    pub(crate) fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn capture_loop(
    mut device: Box<dyn AudioDevice>,
    buffer_size: usize,
    running: Arc<AtomicBool>,
    core: Arc<SessionCore>,
) {
    // One buffer reused for the lifetime of the loop.
    let mut buffer = vec![0u8; buffer_size];

    while running.load(Ordering::SeqCst) {
        match device.read(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                if core.is_recording() {
                    core.forward_audio(&buffer[..n]);
                }
            }
            Err(e) => {
                // Chunk dropped; a persistently failing device degrades to
                // silence without stopping the session.
                tracing::debug!("Audio read failed, chunk dropped: {}", e);
            }
        }
    }

    device.stop();
    tracing::debug!("Audio capture thread stopped");
}
