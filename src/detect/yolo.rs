//! YOLOv5 output decoding.
//!
//! A YOLOv5 head emits `N` rows of `5 + classes` values:
//! `cx, cy, w, h, objectness, score_0 .. score_k`, in model-input pixels.
//! Decoding keeps rows whose `objectness * best_score` clears the threshold,
//! rescales boxes to the frame, and suppresses overlapping boxes per class.

use crate::detect::result::{BoundingBox, Detection, ObjectClass};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

#[derive(Clone, Copy, Debug)]
pub struct YoloParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Horizontal scale from model input to frame pixels.
    pub scale_x: f32,
    /// Vertical scale from model input to frame pixels.
    pub scale_y: f32,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// Decode flattened YOLOv5 output. `row_len` is `5 + number_of_classes`.
pub fn decode_yolov5(output: &[f32], row_len: usize, params: &YoloParams) -> Vec<Detection> {
    if row_len <= 5 {
        return Vec::new();
    }
    let mut candidates: Vec<(usize, Detection)> = output
        .chunks_exact(row_len)
        .filter_map(|row| {
            let objectness = row[4];
            let (class_idx, class_score) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (idx, score)| {
                    if score > best.1 {
                        (idx, score)
                    } else {
                        best
                    }
                });
            let confidence = objectness * class_score;
            if !confidence.is_finite() || confidence < params.confidence_threshold {
                return None;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let bbox = BoundingBox::new(
                (cx - w / 2.0) * params.scale_x,
                (cy - h / 2.0) * params.scale_y,
                (cx + w / 2.0) * params.scale_x,
                (cy + h / 2.0) * params.scale_y,
            );
            Some((
                class_idx,
                Detection {
                    class: ObjectClass::from_coco(class_idx),
                    confidence,
                    bbox,
                },
            ))
        })
        .collect();

    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));

    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class_idx, det) in candidates {
        let suppressed = kept.iter().any(|(kept_class, kept_det)| {
            *kept_class == class_idx && kept_det.bbox.iou(&det.bbox) > params.iou_threshold
        });
        if !suppressed {
            kept.push((class_idx, det));
            if kept.len() >= MAX_DETECTIONS {
                break;
            }
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}
