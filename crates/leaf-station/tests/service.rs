use async_trait::async_trait;
use image::{Rgb, RgbImage};
use leaf_gpio::{ActuationConfig, ActuationDecider, ActuationDispatcher, SimulatedActuator};
use leaf_proto::{Action, BBox, RegionOrigin};
use leaf_station::{Analyzer, ManualConfig, ModeState, SchedulerConfig, SourceFactory, StartOutcome, StationError, VideoService};
use leaf_uplink::{Classification, Classifier, ClassifierConfig, ClassifyError, Journal, JournalConfig};
use leaf_vision::{CameraConfig, CaptureError, DetectorConfig, Frame, FrameSource, LeafDetector};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Frame `seq` shows `1 + seq % 3` green squares on grey.
fn leaves_frame(seq: u64) -> RgbImage {
    let mut img = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
    for i in 0..(1 + seq % 3) as u32 {
        let x0 = 20 + i * 200;
        for y in 100..220 {
            for x in x0..x0 + 120 {
                img.put_pixel(x, y, Rgb([0, 180, 0]));
            }
        }
    }
    img
}

/// What every camera handle made by one rig did, in order.
#[derive(Default)]
struct CameraLog {
    open_handles: AtomicUsize,
    max_open_handles: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
}

impl CameraLog {
    fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    fn is_open(&self) -> bool {
        self.open_handles.load(Ordering::SeqCst) > 0
    }
}

struct FakeCamera {
    fail_open: bool,
    read_delay: Duration,
    open: bool,
    log: Arc<CameraLog>,
    seq: u64,
}

#[async_trait]
impl FrameSource for FakeCamera {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn open(&mut self, _device_index: u32) -> Result<(), CaptureError> {
        if self.fail_open {
            return Err(CaptureError::Device("no such camera".into()));
        }
        if !self.open {
            self.open = true;
            let n = self.log.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
            self.log.max_open_handles.fetch_max(n, Ordering::SeqCst);
            self.log.push("open");
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotRunning);
        }
        tokio::time::sleep(self.read_delay).await;
        self.seq += 1;
        self.log.push("read");
        Ok(Frame::new(leaves_frame(self.seq), self.seq))
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.open_handles.fetch_sub(1, Ordering::SeqCst);
            self.log.push("close");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct FakeClassifier {
    calls: AtomicUsize,
    fail_call: Option<usize>,
    // this call never answers
    hang_call: Option<usize>,
    delay: Duration,
    disease: &'static str,
    severity: f32,
}

impl FakeClassifier {
    fn new(disease: &'static str, severity: f32) -> Self {
        Self { calls: AtomicUsize::new(0), fail_call: None, hang_call: None, delay: Duration::ZERO, disease, severity }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, jpeg: Vec<u8>) -> Result<Classification, ClassifyError> {
        assert!(jpeg.starts_with(&[0xff, 0xd8]), "crop is not a jpeg");
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if Some(n) == self.hang_call {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        if Some(n) == self.fail_call {
            return Err(ClassifyError::Status(503));
        }
        Ok(Classification { disease: self.disease.into(), severity: self.severity })
    }
}

#[derive(Clone, Copy)]
struct RigCfg {
    fail_open: bool,
    interval_ms: u64,
    timeout_ms: u64,
    read_delay_ms: u64,
}

impl Default for RigCfg {
    fn default() -> Self {
        Self { fail_open: false, interval_ms: 3000, timeout_ms: 1000, read_delay_ms: 0 }
    }
}

struct Rig {
    svc: Arc<VideoService>,
    camera: Arc<CameraLog>,
    _dir: tempfile::TempDir,
}

fn rig(fail_open: bool, classifier: Arc<FakeClassifier>, interval_ms: u64) -> Rig {
    rig_with(classifier, RigCfg { fail_open, interval_ms, ..RigCfg::default() })
}

fn rig_with(classifier: Arc<FakeClassifier>, cfg: RigCfg) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let camera = Arc::new(CameraLog::default());
    let log = camera.clone();
    let sources: SourceFactory = Arc::new(move |_cfg: &CameraConfig| {
        Ok(Box::new(FakeCamera {
            fail_open: cfg.fail_open,
            read_delay: Duration::from_millis(cfg.read_delay_ms),
            open: false,
            log: log.clone(),
            seq: 0,
        }) as Box<dyn FrameSource>)
    });

    let journal = Journal::new(&JournalConfig {
        path: dir.path().join("journal.jsonl").to_string_lossy().into_owned(),
        image_dir: None,
    });
    let analyzer = Analyzer::new(
        Arc::new(LeafDetector::fallback_only(DetectorConfig::default())),
        classifier,
        ClassifierConfig { timeout_ms: cfg.timeout_ms, ..ClassifierConfig::default() },
        ActuationDecider::new(ActuationConfig::default()),
        ActuationDispatcher::new(Box::new(SimulatedActuator::default()), Duration::from_secs(60)),
        journal,
    );
    let svc = VideoService::new(
        CameraConfig::default(),
        SchedulerConfig { interval_ms: cfg.interval_ms },
        ManualConfig::default(),
        sources,
        Arc::new(analyzer),
    );
    Rig { svc: Arc::new(svc), camera, _dir: dir }
}

async fn wait_for_tick(svc: &VideoService, tick: u64) -> Arc<leaf_station::AutoBatch> {
    for _ in 0..500 {
        let b = svc.get_automatic_detections().unwrap();
        if b.tick >= tick {
            return b;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scheduler never reached tick {}", tick);
}

async fn wait_for_calls(classifier: &FakeClassifier, n: usize) {
    for _ in 0..500 {
        if classifier.calls() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("classifier never reached {} calls", n);
}

#[tokio::test]
async fn failed_start_leaves_no_session() {
    let r = rig(true, Arc::new(FakeClassifier::new("healthy", 0.0)), 3000);
    let err = r.svc.start_video(Some(3)).await.unwrap_err();
    assert!(matches!(err, StationError::Device(_)));
    assert!(!r.svc.status().running);
    assert!(!r.svc.stop_video().await);
    assert_eq!(r.svc.video_click(10.0, 10.0).unwrap_err(), StationError::NotRunning);
}

#[tokio::test]
async fn click_on_fresh_session_creates_region_zero() {
    let r = rig(false, Arc::new(FakeClassifier::new("healthy", 0.0)), 3000);
    assert_eq!(r.svc.start_video(Some(0)).await.unwrap(), StartOutcome::Started);
    assert_eq!(r.svc.start_video(Some(0)).await.unwrap(), StartOutcome::AlreadyRunning);

    let (region, count) = r.svc.video_click(100.0, 100.0).unwrap();
    assert_eq!(region.id, 0);
    assert_eq!(region.origin, RegionOrigin::Manual);
    assert_eq!(region.bbox, BBox::new(25, 25, 150, 150));
    assert_eq!(count, 1);

    // second click inside the cooldown window
    assert_eq!(r.svc.video_click(300.0, 300.0).unwrap_err(), StationError::Cooldown(1000));
    assert_eq!(r.svc.regions().unwrap().len(), 1);
}

#[tokio::test]
async fn toggle_twice_restores_mode_and_gates_operations() {
    let r = rig(false, Arc::new(FakeClassifier::new("healthy", 0.0)), 60_000);
    assert_eq!(r.svc.toggle_automatic_mode().await, ModeState::Automatic);
    assert_eq!(r.svc.toggle_automatic_mode().await, ModeState::Manual);

    r.svc.start_video(None).await.unwrap();
    assert!(matches!(r.svc.get_automatic_detections(), Err(StationError::WrongMode(_))));

    assert_eq!(r.svc.toggle_automatic_mode().await, ModeState::Automatic);
    assert!(matches!(r.svc.video_click(100.0, 100.0), Err(StationError::WrongMode(_))));
    assert!(matches!(r.svc.detect_leaf(0).await, Err(StationError::WrongMode(_))));

    assert_eq!(r.svc.toggle_automatic_mode().await, ModeState::Manual);
    assert_eq!(r.svc.status().mode, ModeState::Manual);
}

#[tokio::test]
async fn batches_never_mix_ticks() {
    let r = rig(false, Arc::new(FakeClassifier::new("healthy", 5.0)), 10);
    r.svc.start_video(None).await.unwrap();
    r.svc.toggle_automatic_mode().await;

    let mut seen = 0;
    let mut last_tick = 0;
    for _ in 0..1000 {
        let b = r.svc.get_automatic_detections().unwrap();
        if b.tick > last_tick {
            last_tick = b.tick;
            seen += 1;
            assert_eq!(b.results.len() as u64, 1 + b.frame_seq % 3, "tick {}", b.tick);
            let ids: Vec<u64> = b.results.iter().map(|d| d.region_id).collect();
            assert!(ids.windows(2).all(|w| w[1] == w[0] + 1), "ids {:?}", ids);
        }
        if seen >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(seen >= 4, "only saw {} ticks", seen);

    // automatic regions of older ticks are gone
    let regions = r.svc.regions().unwrap();
    assert!(regions.iter().all(|reg| reg.origin == RegionOrigin::Automatic));
    assert!(regions.len() <= 3);
    r.svc.stop_video().await;
}

#[tokio::test]
async fn one_failed_classification_does_not_spoil_the_batch() {
    let classifier = Arc::new(FakeClassifier { fail_call: Some(1), ..FakeClassifier::new("leaf_spot", 40.0) });
    let r = rig(false, classifier, 60_000);
    r.svc.start_video(None).await.unwrap();
    r.svc.toggle_automatic_mode().await;

    // probe read was seq 1, first tick reads seq 2 -> three leaves
    let b = wait_for_tick(&r.svc, 1).await;
    assert_eq!(b.results.len(), 3);
    assert!(b.results[0].error.is_none());
    assert!(b.results[1].error.as_deref().unwrap().contains("503"));
    assert!(b.results[2].error.is_none());
    assert_eq!(b.results[0].action, Some(Action::Alert));
    assert_eq!(b.results[1].action, Some(Action::None));
    // equal confidence, so left to right
    let xs: Vec<u32> = b.results.iter().map(|d| d.bbox.unwrap().x).collect();
    assert!(xs.windows(2).all(|w| w[0] < w[1]));
    r.svc.stop_video().await;
}

#[tokio::test]
async fn severe_disease_irrigates_once_per_interval() {
    let r = rig(false, Arc::new(FakeClassifier::new("late_blight", 80.0)), 60_000);
    r.svc.start_video(None).await.unwrap();
    r.svc.toggle_automatic_mode().await;

    let b = wait_for_tick(&r.svc, 1).await;
    assert!(b.results.iter().all(|d| d.action == Some(Action::Irrigate)));

    let st = r.svc.status();
    assert_eq!(st.sprays, 1);
    assert_eq!(st.suppressed_sprays, b.results.len() as u64 - 1);

    let journal = r.svc.recent(10).await.unwrap();
    assert_eq!(journal.len(), b.results.len());
    assert_eq!(journal.iter().filter(|e| e.suppressed).count(), b.results.len() - 1);
    r.svc.stop_video().await;
}

#[tokio::test]
async fn stop_releases_camera_and_clears_state() {
    let r = rig(false, Arc::new(FakeClassifier::new("healthy", 0.0)), 10);
    r.svc.start_video(None).await.unwrap();
    assert!(r.camera.is_open());
    r.svc.toggle_automatic_mode().await;
    wait_for_tick(&r.svc, 1).await;

    assert!(r.svc.stop_video().await);
    assert!(!r.camera.is_open());
    let st = r.svc.status();
    assert!(!st.running);
    assert_eq!(st.mode, ModeState::Manual);
    assert_eq!(r.svc.get_automatic_detections().unwrap_err(), StationError::NotRunning);

    // a new session starts empty, in manual mode, with ids from 0
    r.svc.start_video(None).await.unwrap();
    let (region, _) = r.svc.video_click(320.0, 240.0).unwrap();
    assert_eq!(region.id, 0);
}

#[tokio::test]
async fn manual_region_analysis() {
    let classifier = Arc::new(FakeClassifier::new("rust", 55.0));
    let r = rig(false, classifier.clone(), 3000);
    r.svc.start_video(None).await.unwrap();
    r.svc.video_click(100.0, 160.0).unwrap();

    let res = r.svc.detect_leaf(0).await.unwrap();
    assert_eq!(res.disease.as_deref(), Some("rust"));
    assert_eq!(res.severity, Some(55.0));
    assert_eq!(res.action, Some(Action::Alert));
    assert_eq!(res.bbox, Some(BBox::new(25, 85, 150, 150)));

    assert_eq!(r.svc.detect_leaf(9).await.unwrap_err(), StationError::NotFound(9));
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn capture_without_session_uses_a_one_shot_camera() {
    let r = rig(false, Arc::new(FakeClassifier::new("healthy", 2.0)), 3000);
    let res = r.svc.capture_detect().await.unwrap();
    assert_eq!(res.disease.as_deref(), Some("healthy"));
    assert_eq!(res.action, Some(Action::None));
    assert!(!r.camera.is_open());
    assert!(!r.svc.status().running);
}

#[tokio::test]
async fn capture_reports_classifier_failure() {
    let classifier = Arc::new(FakeClassifier { fail_call: Some(0), ..FakeClassifier::new("healthy", 0.0) });
    let r = rig(false, classifier, 3000);
    let err = r.svc.capture_detect().await.unwrap_err();
    assert!(matches!(err, StationError::Classification(_)));
}

#[tokio::test]
async fn reads_stay_responsive_while_toggle_waits_for_a_tick() {
    let classifier = Arc::new(FakeClassifier { delay: Duration::from_millis(800), ..FakeClassifier::new("rust", 10.0) });
    let r = rig_with(classifier.clone(), RigCfg { interval_ms: 60_000, ..RigCfg::default() });
    r.svc.start_video(None).await.unwrap();
    r.svc.toggle_automatic_mode().await;
    wait_for_calls(&classifier, 1).await;

    // three leaves at 800ms each: the toggle back waits well over a second
    let svc = r.svc.clone();
    let toggle = tokio::spawn(async move { svc.toggle_automatic_mode().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!toggle.is_finished());

    let started = Instant::now();
    let st = r.svc.status();
    assert!(st.running);
    assert_eq!(st.mode, ModeState::Manual);
    assert_eq!(r.svc.regions().unwrap().len(), 3);
    assert!(matches!(r.svc.get_automatic_detections(), Err(StationError::WrongMode(_))));
    let missing = tokio::time::timeout(Duration::from_millis(200), r.svc.detect_leaf(7)).await;
    assert_eq!(missing.expect("detect_leaf blocked behind toggle").unwrap_err(), StationError::NotFound(7));
    assert!(started.elapsed() < Duration::from_millis(300), "reads took {:?}", started.elapsed());

    assert!(!toggle.is_finished());
    assert_eq!(toggle.await.unwrap(), ModeState::Manual);
    assert_eq!(classifier.calls(), 3);
}

#[tokio::test]
async fn stop_mid_tick_closes_camera_after_the_last_read() {
    let classifier = Arc::new(FakeClassifier { delay: Duration::from_millis(150), ..FakeClassifier::new("rust", 10.0) });
    let r = rig_with(classifier.clone(), RigCfg { interval_ms: 60_000, ..RigCfg::default() });
    r.svc.start_video(None).await.unwrap();
    r.svc.toggle_automatic_mode().await;
    wait_for_calls(&classifier, 1).await;

    let svc = r.svc.clone();
    let stop = tokio::spawn(async move { svc.stop_video().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    // already gone for readers, camera still held by the tick
    assert!(!r.svc.status().running);
    assert_eq!(r.svc.regions().unwrap_err(), StationError::NotRunning);
    assert!(r.camera.is_open());

    assert!(stop.await.unwrap());
    assert!(!r.camera.is_open());
    // probe read at start, one tick read, then the release
    assert_eq!(r.camera.events(), vec!["open", "read", "read", "close"]);
    // the in-flight tick ran to the end: every leaf was classified and journaled
    assert_eq!(classifier.calls(), 3);
    assert_eq!(r.svc.recent(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn hanging_classifier_times_out_one_region_only() {
    let classifier = Arc::new(FakeClassifier { hang_call: Some(1), ..FakeClassifier::new("leaf_spot", 40.0) });
    let r = rig_with(classifier, RigCfg { interval_ms: 60_000, timeout_ms: 100, ..RigCfg::default() });
    r.svc.start_video(None).await.unwrap();
    r.svc.toggle_automatic_mode().await;

    let b = wait_for_tick(&r.svc, 1).await;
    assert_eq!(b.results.len(), 3);
    assert!(b.results[0].error.is_none());
    let err = b.results[1].error.as_deref().unwrap();
    assert!(err.contains("timed out"), "{}", err);
    assert!(b.results[1].disease.is_none());
    assert_eq!(b.results[1].action, Some(Action::None));
    assert!(b.results[2].error.is_none());
    assert_eq!(b.results[2].disease.as_deref(), Some("leaf_spot"));

    let journal = r.svc.recent(10).await.unwrap();
    assert_eq!(journal.iter().filter(|e| e.error.is_some()).count(), 1);
    r.svc.stop_video().await;
}

#[tokio::test]
async fn one_shot_capture_and_start_never_share_the_camera() {
    let r = rig_with(
        Arc::new(FakeClassifier::new("healthy", 1.0)),
        RigCfg { read_delay_ms: 50, ..RigCfg::default() },
    );

    let (captured, started) = tokio::join!(r.svc.capture_detect(), r.svc.start_video(None));
    assert!(captured.is_ok());
    assert_eq!(started.unwrap(), StartOutcome::Started);
    assert_eq!(r.camera.max_open_handles.load(Ordering::SeqCst), 1);
    assert_eq!(r.camera.events(), vec!["open", "read", "close", "open", "read"]);

    // with a session running the capture reuses its handle
    r.svc.capture_detect().await.unwrap();
    assert_eq!(r.camera.max_open_handles.load(Ordering::SeqCst), 1);
    r.svc.stop_video().await;
}
