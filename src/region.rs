//! Static seat regions over a fixed-resolution frame.
//!
//! A region is occupied in a frame when at least one person's box center lies
//! inside its closed rectangle. Regions may overlap, so one person can occupy
//! several regions at once. Frames are classified independently.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::{Detection, DetectionResult, ObjectClass};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub seat_number: u32,
    pub name: String,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    /// Occupancy from the most recent classified frame.
    #[serde(skip)]
    pub last_status: Option<bool>,
}

impl Region {
    pub fn new(seat_number: u32, x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self> {
        let region = Self {
            seat_number,
            name: format!("Seat {seat_number}"),
            x1,
            y1,
            x2,
            y2,
            last_status: None,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seat_number == 0 {
            return Err(anyhow!("seat number must be positive"));
        }
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(anyhow!(
                "region for seat {} must satisfy x1 < x2 and y1 < y2 (got ({},{})-({},{}))",
                self.seat_number,
                self.x1,
                self.y1,
                self.x2,
                self.y2
            ));
        }
        Ok(())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Closed-interval containment on all four edges.
    pub fn contains_point(&self, x: i64, y: i64) -> bool {
        i64::from(self.x1) <= x
            && x <= i64::from(self.x2)
            && i64::from(self.y1) <= y
            && y <= i64::from(self.y2)
    }

    pub fn contains_center(&self, detection: &Detection) -> bool {
        let (cx, cy) = detection.bbox.center();
        self.contains_point(cx, cy)
    }
}

/// True when any person detection has its center in the region.
pub fn person_in_region(result: &DetectionResult, region: &Region) -> bool {
    result
        .detections
        .iter()
        .filter(|d| d.class == ObjectClass::Person)
        .any(|d| region.contains_center(d))
}

/// Seat regions ordered by seat number.
#[derive(Clone, Debug, Default)]
pub struct RegionSet {
    regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(mut regions: Vec<Region>) -> Result<Self> {
        for region in &regions {
            region.validate()?;
        }
        regions.sort_by_key(|r| r.seat_number);
        for pair in regions.windows(2) {
            if pair[0].seat_number == pair[1].seat_number {
                return Err(anyhow!(
                    "duplicate region for seat {}",
                    pair[0].seat_number
                ));
            }
        }
        Ok(Self { regions })
    }

    /// Default 2x2 layout: seats 1..4 left-to-right, top-to-bottom.
    pub fn quadrants(width: u32, height: u32) -> Result<Self> {
        let (mx, my) = (width / 2, height / 2);
        Self::new(vec![
            Region::new(1, 0, 0, mx, my)?,
            Region::new(2, mx, 0, width, my)?,
            Region::new(3, 0, my, mx, height)?,
            Region::new(4, mx, my, width, height)?,
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn get(&self, seat_number: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.seat_number == seat_number)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Classify every region for one frame and remember the result on each region.
    pub fn classify(&mut self, result: &DetectionResult) -> Vec<(u32, bool)> {
        self.regions
            .iter_mut()
            .map(|region| {
                let occupied = person_in_region(result, region);
                region.last_status = Some(occupied);
                (region.seat_number, occupied)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn person_centered_at(cx: f32, cy: f32) -> Detection {
        Detection::person(BoundingBox::new(cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0), 0.9)
    }

    #[test]
    fn membership_includes_boundary_and_excludes_outside() {
        let region = Region::new(1, 0, 0, 320, 240).unwrap();
        assert!(region.contains_center(&person_centered_at(100.0, 100.0)));
        assert!(region.contains_center(&person_centered_at(320.0, 240.0)));
        assert!(region.contains_center(&person_centered_at(0.0, 0.0)));
        assert!(!region.contains_center(&person_centered_at(321.0, 100.0)));
        assert!(!region.contains_center(&person_centered_at(100.0, 241.0)));
    }

    #[test]
    fn non_person_detections_do_not_occupy() {
        let region = Region::new(1, 0, 0, 320, 240).unwrap();
        let mut det = person_centered_at(50.0, 50.0);
        det.class = ObjectClass::Animal;
        assert!(!person_in_region(&DetectionResult::new(vec![det]), &region));
    }

    #[test]
    fn overlapping_regions_both_report_one_person() {
        let mut set = RegionSet::new(vec![
            Region::new(1, 0, 0, 300, 300).unwrap(),
            Region::new(2, 200, 200, 500, 500).unwrap(),
        ])
        .unwrap();
        let result = DetectionResult::new(vec![person_centered_at(250.0, 250.0)]);
        assert_eq!(set.classify(&result), vec![(1, true), (2, true)]);
    }

    #[test]
    fn quadrants_match_default_layout() {
        let set = RegionSet::quadrants(640, 480).unwrap();
        let rects: Vec<(u32, u32, u32, u32)> =
            set.iter().map(|r| (r.x1, r.y1, r.x2, r.y2)).collect();
        assert_eq!(
            rects,
            vec![
                (0, 0, 320, 240),
                (320, 0, 640, 240),
                (0, 240, 320, 480),
                (320, 240, 640, 480)
            ]
        );
        assert_eq!(set.get(3).map(|r| r.name.as_str()), Some("Seat 3"));
    }

    #[test]
    fn rejects_duplicates_and_degenerate_rectangles() {
        assert!(Region::new(0, 0, 0, 10, 10).is_err());
        assert!(Region::new(1, 10, 0, 10, 10).is_err());
        assert!(RegionSet::new(vec![
            Region::new(1, 0, 0, 10, 10).unwrap(),
            Region::new(1, 5, 5, 20, 20).unwrap(),
        ])
        .is_err());
    }

    #[test]
    fn classify_records_last_status() {
        let mut set = RegionSet::quadrants(640, 480).unwrap();
        set.classify(&DetectionResult::new(vec![person_centered_at(500.0, 400.0)]));
        assert_eq!(set.get(4).unwrap().last_status, Some(true));
        assert_eq!(set.get(1).unwrap().last_status, Some(false));
    }
}
