mod nms;
pub mod camera;
pub mod detector;
pub mod doctor;
pub mod fallback;
pub mod frame;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;
use leaf_proto::BBox;

pub use camera::{source_from_config, CameraConfig, CaptureError, FrameSource};
pub use detector::{DetectorConfig, Detections, FallbackReason, LeafDetector};
pub use frame::Frame;

/// One raw SSD output row. Coordinates normalized 0..1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: i32,
    pub score: f32,
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl RawDetection {
    fn corners(&self) -> [f32; 4] {
        [self.ymin, self.xmin, self.ymax, self.xmax]
    }
}

/// A leaf candidate in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafBox {
    pub bbox: BBox,
    pub confidence: f32,
}

/// Pretrained single-shot detector behind the primary strategy.
pub trait LeafModel: Send {
    fn name(&self) -> &'static str;
    /// Runs the model on a full frame; resizing to the model input is the model's job.
    fn infer(&mut self, rgb: &RgbImage) -> Result<Vec<RawDetection>>;
}

pub fn postprocess_ssd(raw: &[RawDetection], leaf_class_id: i32, conf_th: f32) -> Vec<RawDetection> {
    raw.iter()
        .filter(|d| d.class_id == leaf_class_id && d.score > conf_th)
        .copied()
        .collect()
}

pub fn nms_filter(mut dets: Vec<RawDetection>, iou_th: f32, max_det: usize) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<RawDetection> = Vec::new();

    'outer: for d in dets {
        for k in &kept {
            if nms::iou(d.corners(), k.corners()) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
        if kept.len() >= max_det { break; }
    }
    kept
}

/// Maps normalized boxes back to frame pixels, clamped to the frame.
/// Boxes whose sides are not larger than `min_side` are dropped.
pub fn to_pixel_boxes(dets: &[RawDetection], frame_w: u32, frame_h: u32, min_side: u32) -> Vec<LeafBox> {
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    dets.iter()
        .filter_map(|d| {
            let x1 = (d.xmin * fw).clamp(0.0, fw) as u32;
            let y1 = (d.ymin * fh).clamp(0.0, fh) as u32;
            let x2 = (d.xmax * fw).clamp(0.0, fw) as u32;
            let y2 = (d.ymax * fh).clamp(0.0, fh) as u32;
            let bbox = BBox::from_corners(x1, y1, x2, y2)?;
            if bbox.w <= min_side || bbox.h <= min_side {
                return None;
            }
            Some(LeafBox { bbox, confidence: d.score.clamp(0.0, 1.0) })
        })
        .collect()
}

/// Descending confidence; ties broken by ascending x so output is deterministic.
pub fn sort_boxes(boxes: &mut [LeafBox]) {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.bbox.x.cmp(&b.bbox.x))
    });
}
