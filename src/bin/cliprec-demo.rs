//! Records a short synthetic clip end to end.
//!
//! Generates NV21 test frames and a sine tone, runs them through the real
//! FFmpeg encoder and WAV tap, and prints the resulting clip info. Needs
//! `ffmpeg` on PATH but no capture hardware.

use anyhow::Result;
use cliprec::{
    AudioBackend, AudioDevice, ClipRecorder, FfmpegEncoderBackend, FrameBufferPool, FrameFormat,
    PcmSpec, RecorderConfig, RecordingResult, WavTapBackend,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cliprec=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("cliprec-demo"));

    let mut config = RecorderConfig::new(&output_dir);
    config.max_duration_ms = 3_000;

    let mut recorder = ClipRecorder::new(
        config,
        Box::new(FfmpegEncoderBackend::new()),
        Box::new(WavTapBackend),
        Box::new(ToneAudioBackend),
    );

    recorder.start()?;
    tracing::info!("Recording to {}", output_dir.display());

    let sink = recorder.frame_sink();
    let format = sink.frame_format();
    let pool = FrameBufferPool::new(format, 2);
    let frame_interval = Duration::from_millis(1_000 / 30);

    // The duration limit stops the session from inside on_frame.
    let mut tick = 0u32;
    while recorder.is_recording() {
        let mut frame = pool.acquire();
        paint_nv21(&mut frame, format, tick);
        sink.on_frame(frame, &pool);
        tick = tick.wrapping_add(1);
        thread::sleep(frame_interval);
    }

    match recorder.last_clip() {
        Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
        None => anyhow::bail!("recording produced no clip"),
    }
    Ok(())
}

/// Moving luma gradient over neutral chroma
fn paint_nv21(frame: &mut [u8], format: FrameFormat, tick: u32) {
    let width = format.width as usize;
    let height = format.height as usize;
    let y_plane = width * height;

    for row in 0..height {
        for col in 0..width {
            frame[row * width + col] = ((col + row + tick as usize * 4) % 256) as u8;
        }
    }
    for byte in frame[y_plane..].iter_mut() {
        *byte = 128;
    }
}

/// Synthetic microphone producing a 440 Hz tone at roughly real time
struct ToneAudioBackend;

impl AudioBackend for ToneAudioBackend {
    fn min_buffer_size(&self, spec: &PcmSpec) -> usize {
        spec.buffer_size_bytes(20)
    }

    fn open(&self, spec: &PcmSpec) -> RecordingResult<Box<dyn AudioDevice>> {
        Ok(Box::new(ToneDevice {
            sample_rate: spec.sample_rate,
            phase: 0,
        }))
    }
}

struct ToneDevice {
    sample_rate: u32,
    phase: u64,
}

impl AudioDevice for ToneDevice {
    fn start(&mut self) -> RecordingResult<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> RecordingResult<usize> {
        let samples = buf.len() / 2;
        for i in 0..samples {
            let t = self.phase as f32 / self.sample_rate as f32;
            let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16;
            buf[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
            self.phase += 1;
        }
        // Pace the stream so the clip's audio spans real time.
        thread::sleep(Duration::from_millis(
            samples as u64 * 1_000 / u64::from(self.sample_rate),
        ));
        Ok(samples * 2)
    }

    fn stop(&mut self) {}
}
