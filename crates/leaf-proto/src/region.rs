use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates (top-left corner + size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BBox {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Builds a box from exclusive corner coordinates. `None` when the box is empty.
    pub fn from_corners(x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Self> {
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self { x: x1, y: y1, w: x2 - x1, h: y2 - y1 })
    }

    pub fn x2(&self) -> u64 {
        self.x as u64 + self.w as u64
    }

    pub fn y2(&self) -> u64 {
        self.y as u64 + self.h as u64
    }

    pub fn is_degenerate(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn fits_within(&self, frame_w: u32, frame_h: u32) -> bool {
        self.x2() <= frame_w as u64 && self.y2() <= frame_h as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionOrigin {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: u64,
    pub bbox: BBox,
    pub origin: RegionOrigin,
    pub created_at_ms: i64,
    /// Detector confidence; manual regions carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_reject_empty_boxes() {
        assert!(BBox::from_corners(10, 10, 10, 40).is_none());
        assert!(BBox::from_corners(10, 40, 30, 20).is_none());
        assert_eq!(BBox::from_corners(10, 20, 30, 60), Some(BBox::new(10, 20, 20, 40)));
    }

    #[test]
    fn fits_within_uses_exclusive_edges() {
        assert!(BBox::new(25, 25, 150, 150).fits_within(640, 480));
        assert!(BBox::new(590, 430, 50, 50).fits_within(640, 480));
        assert!(!BBox::new(600, 0, 50, 10).fits_within(640, 480));
    }

    #[test]
    fn origin_serializes_lowercase() {
        let s = serde_json::to_string(&RegionOrigin::Automatic).unwrap();
        assert_eq!(s, "\"automatic\"");
    }
}
