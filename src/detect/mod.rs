mod backend;
pub mod backends;
mod result;
pub mod yolo;

pub use backend::{shared, DetectorBackend, SharedBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, DetectionResult, ObjectClass};
