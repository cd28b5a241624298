use leaf_proto::{BBox, Region, RegionOrigin};
use tracing::debug;

use crate::StationError;

/// Leaf regions of one session, in insertion order.
///
/// Ids come from a counter that only moves forward, so an id is never handed
/// out twice in a session even after automatic regions are replaced.
#[derive(Debug, Default)]
pub struct RegionStore {
    regions: Vec<Region>,
    next_id: u64,
}

impl RegionStore {
    pub fn add(
        &mut self,
        bbox: BBox,
        origin: RegionOrigin,
        confidence: Option<f32>,
        frame_w: u32,
        frame_h: u32,
    ) -> Result<Region, StationError> {
        if bbox.is_degenerate() {
            return Err(StationError::InvalidRegion(format!("empty box {}x{}", bbox.w, bbox.h)));
        }
        if !bbox.fits_within(frame_w, frame_h) {
            return Err(StationError::InvalidRegion(format!(
                "box ({},{},{},{}) outside {}x{} frame",
                bbox.x, bbox.y, bbox.w, bbox.h, frame_w, frame_h
            )));
        }
        let region = Region {
            id: self.next_id,
            bbox,
            origin,
            created_at_ms: leaf_proto::unix_ms_now(),
            confidence,
        };
        self.next_id += 1;
        self.regions.push(region.clone());
        Ok(region)
    }

    pub fn get(&self, id: u64) -> Result<&Region, StationError> {
        self.regions.iter().find(|r| r.id == id).ok_or(StationError::NotFound(id))
    }

    pub fn all(&self) -> Vec<Region> {
        self.regions.clone()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Drops every automatic region and adds `boxes` in their place.
    /// Boxes that break the frame invariant are skipped.
    pub fn replace_automatic(&mut self, boxes: &[(BBox, f32)], frame_w: u32, frame_h: u32) -> Vec<Region> {
        self.regions.retain(|r| r.origin == RegionOrigin::Manual);
        let mut added = Vec::with_capacity(boxes.len());
        for (bbox, conf) in boxes {
            match self.add(*bbox, RegionOrigin::Automatic, Some(*conf), frame_w, frame_h) {
                Ok(r) => added.push(r),
                Err(e) => debug!("regions: skipping detector box: {}", e),
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_across_origins() {
        let mut s = RegionStore::default();
        let a = s.add(BBox::new(0, 0, 10, 10), RegionOrigin::Manual, None, 640, 480).unwrap();
        let b = s.replace_automatic(&[(BBox::new(5, 5, 20, 20), 0.9)], 640, 480);
        let c = s.add(BBox::new(30, 30, 10, 10), RegionOrigin::Manual, None, 640, 480).unwrap();
        assert_eq!((a.id, b[0].id, c.id), (0, 1, 2));

        let d = s.replace_automatic(&[(BBox::new(5, 5, 20, 20), 0.9)], 640, 480);
        assert_eq!(d[0].id, 3);
    }

    #[test]
    fn rejects_degenerate_and_out_of_frame_boxes() {
        let mut s = RegionStore::default();
        for bbox in [BBox::new(10, 10, 0, 5), BBox::new(600, 10, 41, 10), BBox::new(0, 470, 10, 11)] {
            let err = s.add(bbox, RegionOrigin::Manual, None, 640, 480).unwrap_err();
            assert!(matches!(err, StationError::InvalidRegion(_)));
        }
        assert!(s.is_empty());
        // rejected adds do not burn ids
        assert_eq!(s.add(BBox::new(0, 0, 640, 480), RegionOrigin::Manual, None, 640, 480).unwrap().id, 0);
    }

    #[test]
    fn replace_keeps_manual_regions() {
        let mut s = RegionStore::default();
        s.add(BBox::new(0, 0, 10, 10), RegionOrigin::Manual, None, 640, 480).unwrap();
        s.replace_automatic(&[(BBox::new(100, 100, 50, 50), 0.7), (BBox::new(200, 100, 50, 50), 0.6)], 640, 480);
        assert_eq!(s.len(), 3);

        s.replace_automatic(&[(BBox::new(300, 100, 50, 50), 0.5)], 640, 480);
        let origins: Vec<_> = s.all().iter().map(|r| r.origin).collect();
        assert_eq!(origins, vec![RegionOrigin::Manual, RegionOrigin::Automatic]);
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let mut s = RegionStore::default();
        s.add(BBox::new(0, 0, 10, 10), RegionOrigin::Manual, None, 640, 480).unwrap();
        assert_eq!(s.get(0).unwrap().id, 0);
        assert_eq!(s.get(7), Err(StationError::NotFound(7)));
        s.clear();
        assert_eq!(s.get(0), Err(StationError::NotFound(0)));
    }
}
