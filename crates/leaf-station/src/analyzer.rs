use image::RgbImage;
use leaf_gpio::state::{ActuatorStatus, StatusHandle};
use leaf_gpio::{ActuationDecider, ActuationDispatcher, DispatchOutcome};
use leaf_proto::{Action, BBox, DetectionResult, EntrySource, JournalEntry};
use leaf_uplink::{classify_with_timeout, Classifier, ClassifierConfig, Journal};
use leaf_vision::{frame::encode_jpeg, Detections, FallbackReason, Frame, LeafDetector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Everything between a crop and an actuator pulse: classify, decide,
/// dispatch, journal. Shared by the scheduler and the manual endpoints.
pub struct Analyzer {
    detector: Arc<LeafDetector>,
    classifier: Arc<dyn Classifier>,
    classifier_cfg: ClassifierConfig,
    decider: ActuationDecider,
    dispatcher: Mutex<ActuationDispatcher>,
    actuator_status: StatusHandle,
    journal: Journal,
}

impl Analyzer {
    pub fn new(
        detector: Arc<LeafDetector>,
        classifier: Arc<dyn Classifier>,
        classifier_cfg: ClassifierConfig,
        decider: ActuationDecider,
        dispatcher: ActuationDispatcher,
        journal: Journal,
    ) -> Self {
        let actuator_status = dispatcher.status_handle();
        Self {
            detector,
            classifier,
            classifier_cfg,
            decider,
            dispatcher: Mutex::new(dispatcher),
            actuator_status,
            journal,
        }
    }

    pub fn detector(&self) -> &LeafDetector {
        &self.detector
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn input_size(&self) -> u32 {
        self.classifier_cfg.input_size
    }

    pub fn actuator_status(&self) -> ActuatorStatus {
        self.actuator_status.snapshot()
    }

    /// Runs the detector off the async workers. Never fails: a panicking
    /// model yields an empty fallback result.
    pub async fn detect(&self, frame: Arc<Frame>) -> Detections {
        let detector = self.detector.clone();
        match tokio::task::spawn_blocking(move || detector.detect_tagged(&frame)).await {
            Ok(d) => d,
            Err(e) => {
                warn!("detector task failed: {}", e);
                Detections::Fallback { reason: FallbackReason::InferenceFailed(e.to_string()), boxes: Vec::new() }
            }
        }
    }

    /// Classifies `image` and acts on the result. Classification problems end
    /// up in the result's `error` field.
    pub async fn analyze(
        &self,
        source: EntrySource,
        region_id: u64,
        confidence: f32,
        image: &RgbImage,
        bbox: Option<BBox>,
    ) -> DetectionResult {
        let (res, image_path) = self.classify(source, region_id, confidence, image).await;
        let outcome = self.act(&res).await;
        self.record(source, &res, &outcome, image_path).await;
        let result = res.with_action(outcome.action);
        match bbox {
            Some(b) => result.with_bbox(b),
            None => result,
        }
    }

    /// Classifies and journals an uploaded picture. The actuator is never
    /// touched. Returns the result and where the picture was kept, if anywhere.
    pub async fn analyze_upload(&self, image: &RgbImage) -> (DetectionResult, Option<String>) {
        let (res, image_path) = self.classify(EntrySource::Upload, 0, 1.0, image).await;
        let outcome = DispatchOutcome { action: Action::None, duration_ms: 0, suppressed: false, error: None };
        self.record(EntrySource::Upload, &res, &outcome, image_path.clone()).await;
        (res.with_action(Action::None), image_path)
    }

    async fn classify(
        &self,
        source: EntrySource,
        region_id: u64,
        confidence: f32,
        image: &RgbImage,
    ) -> (DetectionResult, Option<String>) {
        let jpeg = match encode_jpeg(image, self.classifier_cfg.jpeg_quality) {
            Ok(j) => j,
            Err(e) => return (DetectionResult::failed(region_id, confidence, format!("{:#}", e)), None),
        };
        let image_path = self.keep_image(source, region_id, &jpeg).await;
        let timeout = Duration::from_millis(self.classifier_cfg.timeout_ms);
        let res = match classify_with_timeout(self.classifier.as_ref(), jpeg, timeout).await {
            Ok(c) => DetectionResult::classified(region_id, confidence, c.disease, c.severity),
            Err(e) => {
                warn!("classify region {}: {}", region_id, e);
                DetectionResult::failed(region_id, confidence, e.to_string())
            }
        };
        (res, image_path)
    }

    async fn act(&self, result: &DetectionResult) -> DispatchOutcome {
        let decision = self.decider.decision(result);
        if decision.action != Action::None {
            info!(
                "region {}: {} severity={:.1} -> {}",
                result.region_id,
                result.disease.as_deref().unwrap_or("-"),
                result.severity.unwrap_or(0.0),
                decision.action.as_str()
            );
        }
        self.dispatcher.lock().await.dispatch(decision).await
    }

    async fn keep_image(&self, source: EntrySource, region_id: u64, jpeg: &[u8]) -> Option<String> {
        let name = format!("{:?}_{}_{}", source, leaf_proto::unix_ms_now(), region_id).to_lowercase();
        match self.journal.save_image(&name, jpeg).await {
            Ok(p) => p,
            Err(e) => {
                warn!("journal: keeping crop failed: {:#}", e);
                None
            }
        }
    }

    async fn record(&self, source: EntrySource, res: &DetectionResult, outcome: &DispatchOutcome, image_path: Option<String>) {
        let entry = JournalEntry {
            ts_unix_ms: leaf_proto::unix_ms_now(),
            source,
            region_id: Some(res.region_id),
            disease: res.disease.clone(),
            severity: res.severity,
            action: outcome.action,
            duration_ms: outcome.duration_ms,
            suppressed: outcome.suppressed,
            image_path,
            error: res.error.clone().or_else(|| outcome.error.clone()),
        };
        if let Err(e) = self.journal.append(&entry).await {
            warn!("journal: append failed: {:#}", e);
        }
    }
}
