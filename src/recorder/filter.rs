//! Output filter derivation
//!
//! Computes the crop/rotation filter chain that maps raw sensor frames onto
//! the configured output geometry, rendered as an FFmpeg-style filter string.

use crate::capture::traits::FrameFormat;

/// Rotation applied after cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transpose {
    /// Rotate 90 degrees clockwise
    #[default]
    Clock,
    /// Rotate 90 degrees counter-clockwise
    Cclock,
    /// Rotate 90 degrees clockwise and flip vertically
    ClockFlip,
    /// Rotate 90 degrees counter-clockwise and flip vertically
    CclockFlip,
}

impl Transpose {
    /// FFmpeg transpose filter tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Transpose::Clock => "clock",
            Transpose::Cclock => "cclock",
            Transpose::ClockFlip => "clock_flip",
            Transpose::CclockFlip => "cclock_flip",
        }
    }
}

/// Crop and rotation parameters for one session
///
/// Computed once when recording starts and immutable afterwards. An
/// explicitly configured filter string bypasses the derivation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    /// Crop region width in pixels
    pub crop_width: u32,

    /// Crop region height in pixels
    pub crop_height: u32,

    /// Crop region x offset
    pub crop_x: u32,

    /// Crop region y offset
    pub crop_y: u32,

    /// Rotation applied after cropping
    pub transpose: Transpose,
}

impl FilterSpec {
    pub fn new(crop_width: u32, crop_height: u32, crop_x: u32, crop_y: u32, transpose: Transpose) -> Self {
        Self {
            crop_width,
            crop_height,
            crop_x,
            crop_y,
            transpose,
        }
    }

    /// Derive the default crop for the given frame and output geometry
    ///
    /// The crop keeps the full frame height and takes a width matching the
    /// output aspect ratio after the clockwise rotation swaps the axes. The
    /// width cast truncates.
    pub fn derive(frame: &FrameFormat, output_width: u32, output_height: u32) -> Self {
        let crop_width = (output_height as f32 / output_width as f32 * frame.height as f32) as u32;
        Self {
            crop_width,
            crop_height: frame.height,
            crop_x: 0,
            crop_y: 0,
            transpose: Transpose::default(),
        }
    }

    /// Render the filter chain string passed to the encoder
    pub fn render(&self) -> String {
        format!(
            "crop=w={}:h={}:x={}:y={},transpose={}",
            self.crop_width,
            self.crop_height,
            self.crop_x,
            self.crop_y,
            self.transpose.as_str()
        )
    }
}
