//! Captured frames.
//!
//! - `Frame`: RGB8 pixels plus capture time. The capture time is the timestamp
//!   carried by every occupancy report derived from the frame.
//! - `FrameSource`: anything that can produce frames (camera, file, synthetic).

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::detect::{DetectionResult, DetectorBackend};

#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap RGB8 row-major pixels. Fails when the buffer does not match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: DateTime<Utc>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {}x{} needs {} RGB bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
        })
    }

    /// Solid black frame.
    pub fn blank(width: u32, height: u32, captured_at: DateTime<Utc>) -> Self {
        Self {
            pixels: vec![0u8; width as usize * height as usize * 3],
            width,
            height,
            captured_at,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn run_detector(&self, detector: &mut dyn DetectorBackend) -> Result<DetectionResult> {
        detector.detect(&self.pixels, self.width, self.height)
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
}

pub trait FrameSource {
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. An error ends the monitor loop.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, Utc::now()).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, Utc::now()).is_ok());
    }

    #[test]
    fn frame_runs_detector_over_its_pixels() {
        let frame = Frame::blank(8, 8, Utc::now());
        let mut backend = StubBackend::scripted(vec![vec![Detection::person(
            BoundingBox::new(1.0, 1.0, 3.0, 3.0),
            0.7,
        )]]);
        let result = frame.run_detector(&mut backend).unwrap();
        assert_eq!(result.person_count(), 1);
    }
}
