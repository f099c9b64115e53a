//! FFmpeg child-process encoder
//!
//! Feeds raw media to FFmpeg over stdin: one child encodes video frames, a
//! second encodes PCM audio, each into a stage file next to the output. The
//! stages are remuxed into the final MP4 when the session closes.

use crate::encoder::{Encoder, EncoderBackend, EncoderRequest, RecordingError, RecordingResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// FFmpeg-backed encoder factory
pub struct FfmpegEncoderBackend {
    program: PathBuf,
    pixel_format: String,
}

impl FfmpegEncoderBackend {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            pixel_format: "nv21".to_string(),
        }
    }

    /// Use a specific FFmpeg binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Raw pixel format of the incoming frames (default `nv21`)
    pub fn with_pixel_format(mut self, pixel_format: impl Into<String>) -> Self {
        self.pixel_format = pixel_format.into();
        self
    }
}

impl Default for FfmpegEncoderBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for FfmpegEncoderBackend {
    fn open(&self, request: &EncoderRequest) -> RecordingResult<Box<dyn Encoder>> {
        Ok(Box::new(FfmpegClipEncoder::spawn(self, request)?))
    }
}

/// Map a compression level (0 = slowest/smallest) onto an x264 preset
fn level_to_preset(level: u8) -> &'static str {
    match level {
        0..=1 => "veryslow",
        2..=3 => "slow",
        4..=5 => "medium",
        6..=7 => "fast",
        _ => "veryfast",
    }
}

/// Stage file path derived from the output path (`clip.mp4` -> `clip.video.mp4`)
fn stage_path(output: &Path, suffix: &str) -> PathBuf {
    output.with_extension(suffix)
}

fn build_video_args(request: &EncoderRequest, pixel_format: &str, video_path: &Path) -> Vec<String> {
    let filter_chain = match &request.filters {
        Some(filters) => format!(
            "{},scale={}:{}",
            filters, request.output_width, request.output_height
        ),
        None => format!("scale={}:{}", request.output_width, request.output_height),
    };

    vec![
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        pixel_format.to_string(),
        "-video_size".to_string(),
        format!("{}x{}", request.frame.width, request.frame.height),
        "-framerate".to_string(),
        request.frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-vf".to_string(),
        filter_chain,
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        level_to_preset(request.compression_level).to_string(),
        "-b:v".to_string(),
        request.bitrate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        (request.frame_rate * 2).to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        video_path.to_string_lossy().to_string(),
    ]
}

fn build_audio_args(request: &EncoderRequest, audio_path: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        request.audio.sample_rate.to_string(),
        "-ac".to_string(),
        request.audio.channels.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        audio_path.to_string_lossy().to_string(),
    ]
}

fn build_mux_args(video_path: &Path, audio_path: &Path, output_path: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        video_path.to_string_lossy().to_string(),
        "-i".to_string(),
        audio_path.to_string_lossy().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

/// One session's pair of FFmpeg children plus the finishing remux
struct FfmpegClipEncoder {
    program: PathBuf,
    video: Option<Child>,
    video_stdin: Option<ChildStdin>,
    audio: Option<Child>,
    audio_stdin: Option<ChildStdin>,
    video_path: PathBuf,
    audio_path: PathBuf,
    output_path: PathBuf,
    closed: bool,
}

impl FfmpegClipEncoder {
    fn spawn(backend: &FfmpegEncoderBackend, request: &EncoderRequest) -> RecordingResult<Self> {
        let output_path = request.path.clone();
        let video_path = stage_path(&output_path, "video.mp4");
        let audio_path = stage_path(&output_path, "audio.m4a");

        let mut video = spawn_child(&backend.program, &build_video_args(request, &backend.pixel_format, &video_path))?;
        let video_stdin = match video.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = video.kill();
                return Err(RecordingError::EncodingError(
                    "Failed to capture FFmpeg stdin".to_string(),
                ));
            }
        };

        let mut audio = match spawn_child(&backend.program, &build_audio_args(request, &audio_path)) {
            Ok(child) => child,
            Err(e) => {
                let _ = video.kill();
                return Err(e);
            }
        };
        let audio_stdin = match audio.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = video.kill();
                let _ = audio.kill();
                return Err(RecordingError::EncodingError(
                    "Failed to capture FFmpeg stdin".to_string(),
                ));
            }
        };

        tracing::info!(
            "FFmpeg encoder started: {}x{} -> {}x{} @ {}fps, output {}",
            request.frame.width,
            request.frame.height,
            request.output_width,
            request.output_height,
            request.frame_rate,
            output_path.display(),
        );

        Ok(Self {
            program: backend.program.clone(),
            video: Some(video),
            video_stdin: Some(video_stdin),
            audio: Some(audio),
            audio_stdin: Some(audio_stdin),
            video_path,
            audio_path,
            output_path,
            closed: false,
        })
    }
}

impl Encoder for FfmpegClipEncoder {
    fn encode_video(&mut self, frame: &[u8]) -> RecordingResult<()> {
        let stdin = self.video_stdin.as_mut().ok_or_else(|| {
            RecordingError::EncodingError("Encoder already closed".to_string())
        })?;
        stdin
            .write_all(frame)
            .map_err(|e| RecordingError::EncodingError(format!("Failed to write frame: {e}")))
    }

    fn encode_audio(&mut self, chunk: &[u8]) -> RecordingResult<()> {
        let stdin = self.audio_stdin.as_mut().ok_or_else(|| {
            RecordingError::EncodingError("Encoder already closed".to_string())
        })?;
        stdin
            .write_all(chunk)
            .map_err(|e| RecordingError::EncodingError(format!("Failed to write audio: {e}")))
    }

    fn close(&mut self) -> RecordingResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Closing stdin signals EOF; the children then flush and exit.
        drop(self.video_stdin.take());
        drop(self.audio_stdin.take());

        let video_ok = wait_child(self.video.take(), "video");
        let audio_ok = wait_child(self.audio.take(), "audio");

        let result = if video_ok && audio_ok {
            run_mux(&self.program, &self.video_path, &self.audio_path, &self.output_path)
        } else if video_ok {
            // No usable audio stage; promote the video stage to the output.
            std::fs::rename(&self.video_path, &self.output_path).map_err(RecordingError::from)
        } else {
            Err(RecordingError::EncodingError(
                "FFmpeg video encoding failed".to_string(),
            ))
        };

        remove_stage(&self.video_path);
        remove_stage(&self.audio_path);

        result
    }
}

impl Drop for FfmpegClipEncoder {
    fn drop(&mut self) {
        if let Some(mut child) = self.video.take() {
            let _ = child.kill();
        }
        if let Some(mut child) = self.audio.take() {
            let _ = child.kill();
        }
    }
}

fn spawn_child(program: &Path, args: &[String]) -> RecordingResult<Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RecordingError::EncodingError(format!("Failed to start FFmpeg: {e}")))
}

fn wait_child(child: Option<Child>, label: &str) -> bool {
    let Some(child) = child else {
        return false;
    };
    match child.wait_with_output() {
        Ok(output) => {
            if !output.status.success() {
                tracing::warn!(
                    "FFmpeg {} encoder exited with {}: {}",
                    label,
                    output.status,
                    String::from_utf8_lossy(&output.stderr),
                );
            }
            output.status.success()
        }
        Err(e) => {
            tracing::warn!("Failed to wait for FFmpeg {} encoder: {}", label, e);
            false
        }
    }
}

fn run_mux(program: &Path, video: &Path, audio: &Path, output: &Path) -> RecordingResult<()> {
    let result = Command::new(program)
        .args(&build_mux_args(video, audio, output))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| RecordingError::EncodingError(format!("Failed to run FFmpeg mux: {e}")))?;

    if !result.status.success() {
        return Err(RecordingError::EncodingError(format!(
            "FFmpeg mux exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr),
        )));
    }

    tracing::info!("Encoded clip finalized: {}", output.display());
    Ok(())
}

fn remove_stage(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Failed to remove stage file {}: {}", path.display(), e);
        }
    }
}
