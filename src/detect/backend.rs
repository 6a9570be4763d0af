use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::DetectionResult;

/// A person detector. Pixels are RGB8, row-major; the returned detections are
/// already filtered by the backend's confidence threshold and the monitor does
/// not re-check them.
pub trait DetectorBackend: Send {
    fn name(&self) -> &'static str;

    /// The pixel slice is read-only and not retained.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// `detect` takes `&mut self`, so the monitor holds its backend behind a lock.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

pub fn shared<B: DetectorBackend + 'static>(backend: B) -> SharedBackend {
    Arc::new(Mutex::new(backend))
}
