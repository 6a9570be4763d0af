use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};

/// Frames per phase in the default script.
const DEFAULT_PHASE_FRAMES: usize = 50;

/// Stub backend for testing and `stub://` deployments.
///
/// Replays a fixed script of per-frame detections, cycling when exhausted.
/// Pixels are ignored.
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl StubBackend {
    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Never detects anything.
    pub fn empty() -> Self {
        Self::scripted(Vec::new())
    }

    /// A person sits in the top-left quadrant for a while, then leaves.
    pub fn default_script(width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let person = Detection::person(
            BoundingBox::new(w * 0.1, h * 0.1, w * 0.4, h * 0.45),
            0.87,
        );
        let mut script = vec![vec![person]; DEFAULT_PHASE_FRAMES];
        script.extend(std::iter::repeat(Vec::new()).take(DEFAULT_PHASE_FRAMES));
        Self::scripted(script)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<DetectionResult> {
        if self.script.is_empty() {
            return Ok(DetectionResult::default());
        }
        let detections = self.script[self.cursor % self.script.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Ok(DetectionResult::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_cycles_script() {
        let person = Detection::person(BoundingBox::new(0.0, 0.0, 4.0, 4.0), 0.9);
        let mut backend = StubBackend::scripted(vec![vec![person], vec![]]);

        assert_eq!(backend.detect(&[], 0, 0).unwrap().person_count(), 1);
        assert_eq!(backend.detect(&[], 0, 0).unwrap().person_count(), 0);
        assert_eq!(backend.detect(&[], 0, 0).unwrap().person_count(), 1);
    }

    #[test]
    fn default_script_places_person_in_first_quadrant() {
        let mut backend = StubBackend::default_script(640, 480);
        let result = backend.detect(&[], 640, 480).unwrap();
        let (cx, cy) = result.detections[0].bbox.center();
        assert!(cx <= 320 && cy <= 240);
    }
}
