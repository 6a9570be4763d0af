//! Frame ingestion sources.
//!
//! All sources implement `FrameSource` and hand `Frame`s to the seat monitor.
//! Camera capture itself is an external collaborator; this crate ships a
//! synthetic source and a local image-sequence source.

pub mod file;

pub use file::{FileConfig, FileSource};
