use anyhow::Result;
use std::path::Path;
use tracing::warn;

use crate::{CameraConfig, DetectorConfig};

pub fn check_camera(cfg: &CameraConfig) -> Result<()> {
    anyhow::ensure!(
        matches!(cfg.mode.as_str(), "libcamera-jpeg" | "v4l2-mjpeg" | "image-file"),
        "camera.mode unknown: {}", cfg.mode
    );
    anyhow::ensure!(cfg.width >= 64 && cfg.height >= 64, "camera.width/height too small");
    anyhow::ensure!(cfg.fps >= 1 && cfg.fps <= 60, "camera.fps should be 1..60");
    if cfg.mode == "image-file" {
        let p = cfg.image_path.as_deref().unwrap_or_default();
        anyhow::ensure!(Path::new(p).is_file(), "camera.image_path not found: {}", p);
    }
    Ok(())
}

pub fn check_detector(cfg: &DetectorConfig) -> Result<()> {
    anyhow::ensure!(cfg.confidence_threshold > 0.0 && cfg.confidence_threshold < 1.0, "detector.confidence_threshold should be in (0,1)");
    anyhow::ensure!(cfg.nms_iou_threshold > 0.0 && cfg.nms_iou_threshold <= 1.0, "detector.nms_iou_threshold should be in (0,1]");
    anyhow::ensure!(cfg.input_size >= 32, "detector.input_size too small");
    anyhow::ensure!(cfg.max_detections >= 1, "detector.max_detections must be >= 1");
    let fb = &cfg.fallback;
    anyhow::ensure!(fb.hue_min <= fb.hue_max && fb.hue_max <= 180, "detector.fallback hue range invalid");
    anyhow::ensure!(fb.min_aspect < fb.max_aspect, "detector.fallback aspect range invalid");

    // Not an error: the fallback heuristic covers a missing model.
    if cfg.backend != "fallback" {
        match cfg.model_path.as_deref() {
            Some(p) if Path::new(p).is_file() => {}
            Some(p) => warn!("doctor: detector model not found ({}), fallback heuristic will be used", p),
            None => warn!("doctor: detector.model_path unset, fallback heuristic will be used"),
        }
    }
    Ok(())
}
