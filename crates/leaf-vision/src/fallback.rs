//! Green-region leaf heuristic used when no detection model is available.
//!
//! Pixels are thresholded in HSV (OpenCV scale: H 0..180, S/V 0..255), the mask is
//! cleaned with a morphological close followed by an open, and 8-connected
//! components above a minimum area become leaf candidates.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::region_labelling::{connected_components, Connectivity};
use leaf_proto::BBox;
use serde::Deserialize;

use crate::LeafBox;

const MASK_ON: u8 = 255;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GreenRegionConfig {
    pub hue_min: u8,
    pub hue_max: u8,
    pub sat_min: u8,
    pub val_min: u8,
    pub kernel: u32,
    pub min_area: u64,
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub max_confidence: f32,
    pub area_for_max_confidence: f32,
}

impl Default for GreenRegionConfig {
    fn default() -> Self {
        Self {
            hue_min: 35,
            hue_max: 85,
            sat_min: 50,
            val_min: 50,
            kernel: 5,
            min_area: 1000,
            min_aspect: 0.3,
            max_aspect: 3.0,
            max_confidence: 0.8,
            area_for_max_confidence: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    pub bbox: BBox,
    pub area: u64,
}

/// RGB to HSV in OpenCV's 8-bit convention.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }
    ((h / 2.0).round().min(180.0) as u8, s.round() as u8, v as u8)
}

/// Binary mask (0 or 255) of pixels inside the configured green band.
pub fn green_mask(img: &RgbImage, cfg: &GreenRegionConfig) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let (hue, sat, val) = rgb_to_hsv(p[0], p[1], p[2]);
        let on = hue >= cfg.hue_min && hue <= cfg.hue_max && sat >= cfg.sat_min && val >= cfg.val_min;
        Luma([if on { MASK_ON } else { 0 }])
    })
}

/// Close then open with a `kernel` x `kernel` square.
pub fn clean(mask: &GrayImage, kernel: u32) -> GrayImage {
    let k = (kernel / 2).min(u8::MAX as u32) as u8;
    if k == 0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    let closed = morphology::close(mask, Norm::LInf, k);
    morphology::open(&closed, Norm::LInf, k)
}

#[derive(Clone, Copy)]
struct Extent {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u64,
}

/// 8-connected components of the mask, in label order.
pub fn components(mask: &GrayImage) -> Vec<Component> {
    if mask.width() == 0 || mask.height() == 0 {
        return Vec::new();
    }
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut extents: Vec<Option<Extent>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize(label, None);
        }
        let slot = &mut extents[label - 1];
        match slot {
            None => *slot = Some(Extent { min_x: x, min_y: y, max_x: x, max_y: y, area: 1 }),
            Some(e) => {
                e.min_x = e.min_x.min(x);
                e.min_y = e.min_y.min(y);
                e.max_x = e.max_x.max(x);
                e.max_y = e.max_y.max(y);
                e.area += 1;
            }
        }
    }

    extents
        .into_iter()
        .flatten()
        .filter_map(|e| {
            let bbox = BBox::from_corners(e.min_x, e.min_y, e.max_x + 1, e.max_y + 1)?;
            Some(Component { bbox, area: e.area })
        })
        .collect()
}

pub fn detect_green_regions(img: &RgbImage, cfg: &GreenRegionConfig) -> Vec<LeafBox> {
    let mask = clean(&green_mask(img, cfg), cfg.kernel);
    components(&mask)
        .into_iter()
        .filter(|c| c.area > cfg.min_area)
        .filter_map(|c| {
            let aspect = c.bbox.w as f32 / c.bbox.h as f32;
            if aspect <= cfg.min_aspect || aspect >= cfg.max_aspect {
                return None;
            }
            let confidence = (c.area as f32 / cfg.area_for_max_confidence).min(cfg.max_confidence);
            Some(LeafBox { bbox: c.bbox, confidence })
        })
        .collect()
}
