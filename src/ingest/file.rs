//! Local frame source.
//!
//! `FileSource` produces frames from:
//! - `stub://<name>`: synthetic RGB frames (tests, demos)
//! - a local directory of JPEG/PNG images, replayed in lexical order and looped
//!
//! Remote URLs are rejected; camera capture lives outside this crate.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;

use crate::frame::{Frame, FrameSource, SourceStats};

#[derive(Clone, Debug)]
pub struct FileConfig {
    /// `stub://...` or a local directory path.
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: "stub://camera".to_string(),
            width: 640,
            height: 480,
        }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Images(ImageSequenceSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "frame source only supports local paths or stub:// (got '{}')",
                config.path
            ));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("frame size must be non-zero"));
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(config)),
            })
        } else {
            Ok(Self {
                backend: FileBackend::Images(ImageSequenceSource::new(config)?),
            })
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            FileBackend::Images(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Images(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(_) => true,
            FileBackend::Images(source) => !source.files.is_empty(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => SourceStats {
                frames_captured: source.frame_count,
                location: source.config.path.clone(),
            },
            FileBackend::Images(source) => SourceStats {
                frames_captured: source.frame_count,
                location: source.config.path.clone(),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: FileConfig,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let (width, height) = (self.config.width, self.config.height);
        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.frame_count) % 256) as u8;
        }
        Frame::new(pixels, width, height, Utc::now())
    }
}

// ----------------------------------------------------------------------------
// Image directory source
// ----------------------------------------------------------------------------

struct ImageSequenceSource {
    config: FileConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
}

impl ImageSequenceSource {
    fn new(config: FileConfig) -> Result<Self> {
        Ok(Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        let dir = Path::new(&self.config.path);
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no JPEG/PNG frames found in {}", dir.display()));
        }
        log::info!(
            "FileSource: connected to {} ({} images)",
            dir.display(),
            files.len()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(anyhow!("frame source not connected"));
        }
        let path = &self.files[self.cursor % self.files.len()];
        self.cursor = (self.cursor + 1) % self.files.len();
        let image = image::open(path)
            .with_context(|| format!("decode frame {}", path.display()))?
            .resize_exact(
                self.config.width,
                self.config.height,
                image::imageops::FilterType::Nearest,
            )
            .into_rgb8();
        self.frame_count += 1;
        Frame::new(
            image.into_raw(),
            self.config.width,
            self.config.height,
            Utc::now(),
        )
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
