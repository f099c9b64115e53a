//! Microphone capture backend (cpal)
//!
//! Bridges cpal's push-style callback streams onto the pull-style
//! [`AudioDevice`] boundary. cpal streams are !Send, so each opened device
//! owns a dedicated thread holding the stream; samples cross into `read()`
//! through a std mpsc channel after conversion to the session's PCM format.

use crate::capture::traits::{AudioBackend, AudioDevice, AudioDeviceInfo, PcmSpec};
use crate::encoder::{RecordingError, RecordingResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const BUFFER_DURATION_MS: u32 = 20;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// List available audio input devices
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|device| device.name().ok())
            .map(|name| AudioDeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate audio input devices: {}", e);
            Vec::new()
        }
    }
}

/// Microphone backend addressing a device by name (`None` = system default)
#[derive(Debug, Clone, Default)]
pub struct CpalAudioBackend {
    device_name: Option<String>,
}

impl CpalAudioBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AudioBackend for CpalAudioBackend {
    fn min_buffer_size(&self, spec: &PcmSpec) -> usize {
        spec.buffer_size_bytes(BUFFER_DURATION_MS)
    }

    fn open(&self, spec: &PcmSpec) -> RecordingResult<Box<dyn AudioDevice>> {
        if spec.bits_per_sample != 16 {
            return Err(RecordingError::ConfigurationError(format!(
                "Unsupported bits per sample: {}",
                spec.bits_per_sample
            )));
        }

        let host = cpal::default_host();
        let device = match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| {
                    RecordingError::CaptureError(format!("Failed to enumerate input devices: {e}"))
                })?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| RecordingError::DeviceNotFound(name.clone()))?,
            None => host.default_input_device().ok_or_else(|| {
                RecordingError::DeviceNotFound("No default input device".to_string())
            })?,
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let supported = device.default_input_config().map_err(|e| {
            RecordingError::ConfigurationError(format!("Failed to get input config: {e}"))
        })?;

        tracing::info!(
            "Microphone: {} ({}Hz, {}ch, {:?})",
            device_name,
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format(),
        );

        let capturing = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let (chunk_tx, chunk_rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let target = *spec;
        let thread_capturing = capturing.clone();
        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name("mic-stream".into())
            .spawn(move || {
                run_input_stream(
                    device,
                    supported,
                    target,
                    chunk_tx,
                    ready_tx,
                    thread_capturing,
                    thread_running,
                )
            })?;

        // The stream thread reports back once the stream is playing, so open
        // failures surface here instead of getting lost on the thread.
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(RecordingError::CaptureError(message));
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(RecordingError::CaptureError(
                    "Audio stream thread exited during setup".to_string(),
                ));
            }
        }

        Ok(Box::new(CpalAudioDevice {
            rx: chunk_rx,
            pending: VecDeque::new(),
            capturing,
            running,
            handle: Some(handle),
            stream_gone: false,
        }))
    }
}

/// Thread body owning the !Send cpal stream
fn run_input_stream(
    device: cpal::Device,
    supported: cpal::SupportedStreamConfig,
    target: PcmSpec,
    chunks: Sender<Vec<u8>>,
    ready: Sender<Result<(), String>>,
    capturing: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    let source_rate = supported.sample_rate().0;
    let source_channels = supported.channels();

    // Callback -> processing loop bridge, normalized to f32
    let (sample_tx, sample_rx) = std::sync::mpsc::channel::<Vec<f32>>();

    let err_fn = |err| tracing::error!("Microphone stream error: {}", err);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let sender = sample_tx.clone();
            device.build_input_stream(
                &supported.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = sender.send(data.to_vec());
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let sender = sample_tx.clone();
            device.build_input_stream(
                &supported.into(),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    let _ = sender.send(samples);
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I32 => {
            let sender = sample_tx.clone();
            device.build_input_stream(
                &supported.into(),
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i32::MAX as f32).collect();
                    let _ = sender.send(samples);
                },
                err_fn,
                None,
            )
        }
        fmt => {
            let _ = ready.send(Err(format!("Unsupported sample format: {fmt:?}")));
            return;
        }
    };
    drop(sample_tx);

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(format!("Failed to build input stream: {e}")));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("Failed to start input stream: {e}")));
        return;
    }

    let _ = ready.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        match sample_rx.recv_timeout(READ_TIMEOUT) {
            Ok(samples) => {
                if !capturing.load(Ordering::Relaxed) {
                    continue;
                }
                let mono = fold_to_mono(&samples, source_channels);
                let resampled = resample(&mono, source_rate, target.sample_rate);
                if chunks.send(f32_to_s16le(&resampled)).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    tracing::debug!("Microphone stream thread stopped");
}

/// Pull side of the bridge handed to the capture loop
struct CpalAudioDevice {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    capturing: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stream_gone: bool,
}

impl AudioDevice for CpalAudioDevice {
    fn start(&mut self) -> RecordingResult<()> {
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> RecordingResult<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    if !self.stream_gone {
                        tracing::warn!("Microphone stream ended; reads degrade to silence");
                        self.stream_gone = true;
                    }
                    // Pace the caller's loop like a timed-out read would.
                    std::thread::sleep(READ_TIMEOUT);
                    return Ok(0);
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn stop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Average interleaved channels down to mono
fn fold_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear interpolation resampler
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let output_len = ((samples.len() as f64) / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let idx1 = (idx0 + 1).min(samples.len().saturating_sub(1));
        let frac = (src_idx - idx0 as f64) as f32;

        if idx0 < samples.len() {
            output.push(samples[idx0] * (1.0 - frac) + samples[idx1] * frac);
        }
    }

    output
}

/// Convert f32 samples (-1.0..1.0) to 16-bit little-endian PCM bytes
fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
