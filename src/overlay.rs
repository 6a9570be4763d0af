//! Annotated preview frames.
//!
//! Regions are outlined red when occupied and green when empty, with a filled
//! tab above the top-left corner carrying the seat number and its state.
//! Person boxes are outlined in yellow and a frame counter sits bottom-left.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};

use crate::detect::DetectionResult;
use crate::frame::Frame;
use crate::region::RegionSet;

pub type Rgb = [u8; 3];

pub const OCCUPIED: Rgb = [255, 0, 0];
pub const EMPTY: Rgb = [0, 255, 0];
pub const DETECTION: Rgb = [255, 255, 0];
const LABEL_TEXT: Rgb = [0, 0, 0];
const COUNTER_BACKGROUND: Rgb = [0, 0, 0];
const COUNTER_TEXT: Rgb = [255, 255, 255];

const BORDER_PX: u32 = 3;
const LABEL_HEIGHT: u32 = 14;
const GLYPH_SCALE: u32 = 2;
const GLYPH_ADVANCE: u32 = 4 * GLYPH_SCALE;

/// 3x5 glyphs, one row per byte, low three bits used. Covers the digits and
/// the letters of the labels drawn here.
fn glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch {
        '0' | 'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b111, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        ' ' => [0; 5],
        _ => return None,
    };
    Some(rows)
}

fn text_width(text: &str) -> u32 {
    text.chars().count() as u32 * GLYPH_ADVANCE + 2 * GLYPH_SCALE
}

pub fn region_label(seat_number: u32, occupied: bool) -> String {
    let state = if occupied { "OCCUPIED" } else { "EMPTY" };
    format!("{} {}", seat_number, state)
}

/// Draw regions and person boxes onto a copy of the frame.
pub fn annotate(
    frame: &Frame,
    regions: &RegionSet,
    detections: &DetectionResult,
    frame_number: u64,
) -> Frame {
    let mut out = frame.clone();
    let (width, height) = (out.width, out.height);
    let mut canvas = Canvas {
        pixels: out.pixels_mut(),
        width,
        height,
    };

    for region in regions.iter() {
        let occupied = region.last_status == Some(true);
        let color = if occupied { OCCUPIED } else { EMPTY };
        canvas.stroke_rect(region.x1, region.y1, region.x2, region.y2, BORDER_PX, color);

        let label = region_label(region.seat_number, occupied);
        let tab_top = region.y1.saturating_sub(LABEL_HEIGHT);
        canvas.fill_rect(region.x1, tab_top, region.x1 + text_width(&label), region.y1, color);
        canvas.draw_text(region.x1 + GLYPH_SCALE, tab_top + GLYPH_SCALE, &label, LABEL_TEXT);
    }

    for detection in detections.persons() {
        let b = detection.bbox;
        canvas.stroke_rect(
            b.x1.max(0.0) as u32,
            b.y1.max(0.0) as u32,
            b.x2.max(0.0) as u32,
            b.y2.max(0.0) as u32,
            2,
            DETECTION,
        );
    }

    // sits above the bottom border of the lower regions
    let counter = format!("FRAME: {}", frame_number);
    let counter_top = height.saturating_sub(LABEL_HEIGHT + BORDER_PX);
    let counter_bottom = counter_top + LABEL_HEIGHT;
    canvas.fill_rect(0, counter_top, text_width(&counter), counter_bottom, COUNTER_BACKGROUND);
    canvas.draw_text(GLYPH_SCALE, counter_top + GLYPH_SCALE, &counter, COUNTER_TEXT);
    out
}

struct Canvas<'a> {
    pixels: &'a mut [u8],
    width: u32,
    height: u32,
}

impl Canvas<'_> {
    fn put(&mut self, x: u32, y: u32, color: Rgb) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&color);
    }

    /// Fill `[x1, x2) x [y1, y2)`, clipped to the canvas.
    fn fill_rect(&mut self, x1: u32, y1: u32, x2: u32, y2: u32, color: Rgb) {
        for y in y1..y2.min(self.height) {
            for x in x1..x2.min(self.width) {
                self.put(x, y, color);
            }
        }
    }

    /// Outline drawn inward from the closed rectangle edges.
    fn stroke_rect(&mut self, x1: u32, y1: u32, x2: u32, y2: u32, thickness: u32, color: Rgb) {
        let (x2, y2) = (x2.saturating_add(1), y2.saturating_add(1));
        let t = thickness;
        self.fill_rect(x1, y1, x2, (y1 + t).min(y2), color);
        self.fill_rect(x1, y2.saturating_sub(t).max(y1), x2, y2, color);
        self.fill_rect(x1, y1, (x1 + t).min(x2), y2, color);
        self.fill_rect(x2.saturating_sub(t).max(x1), y1, x2, y2, color);
    }

    /// Unknown characters are skipped without advancing.
    fn draw_text(&mut self, x: u32, y: u32, text: &str, color: Rgb) {
        let mut cursor = x;
        for ch in text.chars() {
            let Some(rows) = glyph(ch.to_ascii_uppercase()) else { continue };
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..3u32 {
                    if bits & (0b100 >> col) != 0 {
                        let px = cursor + col * GLYPH_SCALE;
                        let py = y + row as u32 * GLYPH_SCALE;
                        self.fill_rect(px, py, px + GLYPH_SCALE, py + GLYPH_SCALE, color);
                    }
                }
            }
            cursor += GLYPH_ADVANCE;
        }
    }
}

pub fn snapshot_file_name(at: DateTime<Local>) -> String {
    format!("snapshot_{}.jpg", at.format("%Y%m%d_%H%M%S"))
}

/// Write the frame as a JPEG into `dir`. Returns the written path.
pub fn save_snapshot(frame: &Frame, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(snapshot_file_name(Local::now()));
    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    image
        .save(&path)
        .with_context(|| format!("write snapshot {}", path.display()))?;
    Ok(path)
}
