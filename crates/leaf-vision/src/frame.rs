use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};
use leaf_proto::BBox;

/// A decoded camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub seq: u64,
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self { image, seq, captured_at_ms: leaf_proto::unix_ms_now() }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copies `bbox` out of the frame. `None` if the box is empty or leaves the frame.
    pub fn crop(&self, bbox: &BBox) -> Option<RgbImage> {
        if bbox.is_degenerate() || !bbox.fits_within(self.width(), self.height()) {
            return None;
        }
        Some(image::imageops::crop_imm(&self.image, bbox.x, bbox.y, bbox.w, bbox.h).to_image())
    }

    /// Crop scaled to the square input the classifier expects.
    pub fn crop_resized(&self, bbox: &BBox, side: u32) -> Option<RgbImage> {
        let crop = self.crop(bbox)?;
        Some(image::imageops::resize(&crop, side, side, FilterType::Triangle))
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(img)
        .context("encode jpeg")?;
    Ok(buf)
}
