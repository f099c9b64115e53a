//! WAV tap sink
//!
//! Mirrors the PCM stream fed to the encoder into a standalone WAV file so a
//! session's audio can be inspected on its own.

use crate::capture::traits::PcmSpec;
use crate::encoder::{PcmSink, PcmSinkBackend, RecordingError, RecordingResult};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Factory for [`WavTap`] sinks
pub struct WavTapBackend;

impl PcmSinkBackend for WavTapBackend {
    fn open(&self, path: &Path, spec: &PcmSpec) -> RecordingResult<Box<dyn PcmSink>> {
        if spec.bits_per_sample != 16 {
            return Err(RecordingError::ConfigurationError(format!(
                "WAV tap requires 16-bit samples, got {}",
                spec.bits_per_sample
            )));
        }

        let wav_spec = hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, wav_spec)
            .map_err(|e| RecordingError::EncodingError(format!("Failed to create WAV tap: {e}")))?;

        tracing::debug!("WAV tap opened: {}", path.display());
        Ok(Box::new(WavTap {
            writer: Some(writer),
        }))
    }
}

/// Writes s16le chunks into a WAV container
struct WavTap {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl PcmSink for WavTap {
    fn write(&mut self, chunk: &[u8]) -> RecordingResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            RecordingError::EncodingError("WAV tap already closed".to_string())
        })?;
        for pair in chunk.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| RecordingError::EncodingError(format!("Failed to write WAV sample: {e}")))?;
        }
        Ok(())
    }

    fn close(&mut self) -> RecordingResult<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| RecordingError::EncodingError(format!("Failed to finalize WAV tap: {e}")))?;
        }
        Ok(())
    }
}
