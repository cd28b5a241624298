use serde::{Deserialize, Serialize};

use crate::region::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafClass {
    Leaf,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    Irrigate,
    Alert,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Irrigate => "irrigate",
            Action::Alert => "alert",
        }
    }
}

/// Outcome of classifying one leaf region.
///
/// Either `disease`/`severity` or `error` is populated, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub region_id: u64,
    pub class: LeafClass,
    pub disease: Option<String>,
    pub severity: Option<f32>,
    pub confidence: f32,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl DetectionResult {
    pub fn classified(region_id: u64, confidence: f32, disease: impl Into<String>, severity: f32) -> Self {
        let severity = if severity.is_finite() { severity.clamp(0.0, 100.0) } else { 0.0 };
        Self {
            region_id,
            class: LeafClass::Leaf,
            disease: Some(disease.into()),
            severity: Some(severity),
            confidence: confidence.clamp(0.0, 1.0),
            error: None,
            bbox: None,
            action: None,
        }
    }

    pub fn failed(region_id: u64, confidence: f32, error: impl Into<String>) -> Self {
        Self {
            region_id,
            class: LeafClass::Unknown,
            disease: None,
            severity: None,
            confidence: confidence.clamp(0.0, 1.0),
            error: Some(error.into()),
            bbox: None,
            action: None,
        }
    }

    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// True when the classifier named a disease other than "healthy".
    pub fn has_disease(&self) -> bool {
        match &self.disease {
            Some(d) => !d.trim().is_empty() && !d.trim().eq_ignore_ascii_case("healthy"),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_and_failed_are_exclusive() {
        let ok = DetectionResult::classified(3, 0.9, "leaf_blight", 140.0);
        assert_eq!(ok.severity, Some(100.0));
        assert!(ok.error.is_none());
        assert_eq!(ok.class, LeafClass::Leaf);

        let bad = DetectionResult::failed(4, 1.7, "timeout");
        assert!(bad.disease.is_none() && bad.severity.is_none());
        assert_eq!(bad.confidence, 1.0);
        assert_eq!(bad.class, LeafClass::Unknown);
    }

    #[test]
    fn healthy_is_not_a_disease() {
        assert!(!DetectionResult::classified(0, 0.5, "Healthy", 2.0).has_disease());
        assert!(DetectionResult::classified(0, 0.5, "rust", 2.0).has_disease());
    }

    #[test]
    fn wire_shape_uses_class_key() {
        let v = serde_json::to_value(DetectionResult::classified(1, 0.5, "rust", 42.0)).unwrap();
        assert_eq!(v["class"], "leaf");
        assert_eq!(v["region_id"], 1);
        assert!(v.get("bbox").is_none());
        assert!(v["error"].is_null());
    }
}
