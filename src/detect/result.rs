/// Result of running detection on a frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    /// Detections above the backend's confidence threshold.
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Detections classified as people. Everything else is ignored for occupancy.
    pub fn persons(&self) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(|d| d.class == ObjectClass::Person)
    }

    pub fn person_count(&self) -> usize {
        self.persons().count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn person(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            class: ObjectClass::Person,
            confidence,
            bbox,
        }
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Integer center: corners are truncated to whole pixels, then floor-divided.
    pub fn center(&self) -> (i64, i64) {
        let (bx1, by1, bx2, by2) = (
            self.x1 as i64,
            self.y1 as i64,
            self.x2 as i64,
            self.y2 as i64,
        );
        ((bx1 + bx2).div_euclid(2), (by1 + by2).div_euclid(2))
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Unknown,
}

impl ObjectClass {
    /// Map a COCO class index (as emitted by YOLO models) to a coarse class.
    pub fn from_coco(index: usize) -> Self {
        match index {
            0 => ObjectClass::Person,
            1..=8 => ObjectClass::Vehicle,
            14..=23 => ObjectClass::Animal,
            _ => ObjectClass::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Animal => "animal",
            ObjectClass::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_uses_truncation_and_floor_division() {
        let bbox = BoundingBox::new(10.9, 20.2, 21.7, 31.0);
        // (10 + 21) / 2 = 15, (20 + 31) / 2 = 25
        assert_eq!(bbox.center(), (15, 25));
    }

    #[test]
    fn persons_filters_other_classes() {
        let result = DetectionResult::new(vec![
            Detection::person(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9),
            Detection {
                class: ObjectClass::Vehicle,
                confidence: 0.8,
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            },
        ]);
        assert_eq!(result.person_count(), 1);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }
}
