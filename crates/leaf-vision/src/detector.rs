use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fallback::{detect_green_regions, GreenRegionConfig};
use crate::{nms_filter, postprocess_ssd, sort_boxes, to_pixel_boxes, Frame, LeafBox, LeafModel};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: String, // "tflite" | "fallback"
    pub model_path: Option<String>,
    pub input_size: u32,
    pub threads: i32,
    pub leaf_class_id: i32,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    pub min_box_side: u32,
    pub fallback_on_empty: bool,
    pub fallback: GreenRegionConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "tflite".into(),
            model_path: None,
            input_size: 300,
            threads: 2,
            leaf_class_id: 0,
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.45,
            max_detections: 20,
            min_box_side: 50,
            fallback_on_empty: true,
            fallback: GreenRegionConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("leaf model unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    ModelUnavailable,
    InferenceFailed(String),
    NoPrimaryDetections,
}

/// Detector output tagged with the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Detections {
    Primary(Vec<LeafBox>),
    Fallback { reason: FallbackReason, boxes: Vec<LeafBox> },
}

impl Detections {
    pub fn boxes(&self) -> &[LeafBox] {
        match self {
            Detections::Primary(b) => b,
            Detections::Fallback { boxes, .. } => boxes,
        }
    }

    pub fn into_boxes(self) -> Vec<LeafBox> {
        match self {
            Detections::Primary(b) => b,
            Detections::Fallback { boxes, .. } => boxes,
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            Detections::Primary(_) => "primary",
            Detections::Fallback { .. } => "fallback",
        }
    }
}

pub struct LeafDetector {
    cfg: DetectorConfig,
    model: Mutex<Option<Box<dyn LeafModel>>>,
}

impl LeafDetector {
    pub fn new(cfg: DetectorConfig, model: Option<Box<dyn LeafModel>>) -> Self {
        Self { cfg, model: Mutex::new(model) }
    }

    /// Loads the configured model. A missing or broken model is not fatal:
    /// the detector then runs on the green-region heuristic alone.
    pub fn from_config(cfg: DetectorConfig) -> Self {
        let model = match load_model(&cfg) {
            Ok(m) => {
                info!("detector: primary model {} ready", m.name());
                Some(m)
            }
            Err(e) => {
                warn!("detector: {} - using green-region fallback", e);
                None
            }
        };
        Self::new(cfg, model)
    }

    pub fn fallback_only(cfg: DetectorConfig) -> Self {
        Self::new(cfg, None)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    pub fn has_model(&self) -> bool {
        self.model.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn detect(&self, frame: &Frame) -> Vec<LeafBox> {
        self.detect_tagged(frame).into_boxes()
    }

    /// The single place where the primary/fallback decision is made.
    pub fn detect_tagged(&self, frame: &Frame) -> Detections {
        let primary = {
            let mut guard = self.model.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_mut() {
                None => Err(FallbackReason::ModelUnavailable),
                Some(model) => match model.infer(&frame.image) {
                    Ok(raw) => Ok(self.primary_boxes(&raw, frame)),
                    Err(e) => Err(FallbackReason::InferenceFailed(format!("{:#}", e))),
                },
            }
        };

        let reason = match primary {
            Ok(boxes) if !boxes.is_empty() || !self.cfg.fallback_on_empty => {
                debug!("detector: primary found {} leaves (frame {})", boxes.len(), frame.seq);
                return Detections::Primary(boxes);
            }
            Ok(_) => FallbackReason::NoPrimaryDetections,
            Err(reason) => {
                if let FallbackReason::InferenceFailed(msg) = &reason {
                    warn!("detector: primary inference failed: {}", msg);
                }
                reason
            }
        };

        let mut boxes = detect_green_regions(&frame.image, &self.cfg.fallback);
        sort_boxes(&mut boxes);
        debug!("detector: fallback ({:?}) found {} leaves (frame {})", reason, boxes.len(), frame.seq);
        Detections::Fallback { reason, boxes }
    }

    fn primary_boxes(&self, raw: &[crate::RawDetection], frame: &Frame) -> Vec<LeafBox> {
        let leaves = postprocess_ssd(raw, self.cfg.leaf_class_id, self.cfg.confidence_threshold);
        let kept = nms_filter(leaves, self.cfg.nms_iou_threshold, self.cfg.max_detections);
        let mut boxes = to_pixel_boxes(&kept, frame.width(), frame.height(), self.cfg.min_box_side);
        sort_boxes(&mut boxes);
        boxes
    }
}

pub fn load_model(cfg: &DetectorConfig) -> Result<Box<dyn LeafModel>, ModelError> {
    if cfg.backend == "fallback" {
        return Err(ModelError::Unavailable("disabled by detector.backend=fallback".into()));
    }
    let path = cfg
        .model_path
        .as_deref()
        .ok_or_else(|| ModelError::Unavailable("detector.model_path not set".into()))?;
    if !Path::new(path).is_file() {
        return Err(ModelError::Unavailable(format!("model file not found: {}", path)));
    }

    #[cfg(feature = "vision-tflite")]
    return crate::tflite::TfliteSsd::new(path, cfg.input_size, cfg.threads)
        .map(|m| Box::new(m) as Box<dyn LeafModel>)
        .map_err(|e| ModelError::Unavailable(format!("{:#}", e)));

    #[cfg(not(feature = "vision-tflite"))]
    Err(ModelError::Unavailable(format!(
        "{} present but binary not built with --features vision-tflite",
        path
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawDetection;
    use image::{Rgb, RgbImage};
    use leaf_proto::BBox;

    struct FixedModel(anyhow::Result<Vec<RawDetection>>);

    impl LeafModel for FixedModel {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn infer(&mut self, _rgb: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            match &self.0 {
                Ok(d) => Ok(d.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn leaf_frame() -> Frame {
        let mut img = RgbImage::new(640, 480);
        for y in 100..400 {
            for x in 100..300 {
                img.put_pixel(x, y, Rgb([0, 255, 0]));
            }
        }
        Frame::new(img, 1)
    }

    #[test]
    fn missing_model_falls_back() {
        let det = LeafDetector::from_config(DetectorConfig {
            model_path: Some("/nonexistent/ssd.tflite".into()),
            ..DetectorConfig::default()
        });
        assert!(!det.has_model());

        match det.detect_tagged(&leaf_frame()) {
            Detections::Fallback { reason, boxes } => {
                assert_eq!(reason, FallbackReason::ModelUnavailable);
                assert_eq!(boxes.len(), 1);
                assert_eq!(boxes[0].bbox, BBox::new(100, 100, 200, 300));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn fallback_only_never_fails_on_blank_frames() {
        let det = LeafDetector::fallback_only(DetectorConfig::default());
        assert!(det.detect(&Frame::new(RgbImage::new(640, 480), 0)).is_empty());
        assert!(det.detect(&Frame::new(RgbImage::new(1, 1), 1)).is_empty());
    }

    #[test]
    fn primary_results_are_used_and_ordered() {
        let raw = vec![
            RawDetection { class_id: 0, score: 0.7, ymin: 0.1, xmin: 0.6, ymax: 0.5, xmax: 0.9 },
            RawDetection { class_id: 0, score: 0.9, ymin: 0.1, xmin: 0.1, ymax: 0.5, xmax: 0.4 },
            RawDetection { class_id: 3, score: 0.99, ymin: 0.1, xmin: 0.1, ymax: 0.5, xmax: 0.4 },
        ];
        let det = LeafDetector::new(DetectorConfig::default(), Some(Box::new(FixedModel(Ok(raw)))));
        let out = det.detect_tagged(&leaf_frame());
        assert_eq!(out.strategy(), "primary");
        let confs: Vec<f32> = out.boxes().iter().map(|b| b.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
        assert!(out.boxes().iter().all(|b| b.bbox.fits_within(640, 480)));
    }

    #[test]
    fn empty_primary_triggers_fallback_when_enabled() {
        let det = LeafDetector::new(DetectorConfig::default(), Some(Box::new(FixedModel(Ok(vec![])))));
        assert!(matches!(
            det.detect_tagged(&leaf_frame()),
            Detections::Fallback { reason: FallbackReason::NoPrimaryDetections, .. }
        ));

        let cfg = DetectorConfig { fallback_on_empty: false, ..DetectorConfig::default() };
        let det = LeafDetector::new(cfg, Some(Box::new(FixedModel(Ok(vec![])))));
        assert_eq!(det.detect_tagged(&leaf_frame()), Detections::Primary(vec![]));
    }

    #[test]
    fn inference_error_is_absorbed() {
        let det = LeafDetector::new(
            DetectorConfig::default(),
            Some(Box::new(FixedModel(Err(anyhow::anyhow!("tensor shape mismatch"))))),
        );
        match det.detect_tagged(&leaf_frame()) {
            Detections::Fallback { reason: FallbackReason::InferenceFailed(msg), boxes } => {
                assert!(msg.contains("tensor shape"));
                assert_eq!(boxes.len(), 1);
            }
            other => panic!("expected inference fallback, got {:?}", other),
        }
    }

    #[test]
    fn backend_fallback_disables_model() {
        let cfg = DetectorConfig { backend: "fallback".into(), ..DetectorConfig::default() };
        assert!(matches!(load_model(&cfg), Err(ModelError::Unavailable(_))));
    }
}
