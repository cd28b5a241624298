use leaf_proto::{Action, BBox, DetectionResult, EntrySource, JournalEntry, Region};
use leaf_vision::{CameraConfig, Frame, FrameSource};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    Analyzer, AutoBatch, ManualConfig, ModeController, ModeState, SchedulerConfig, SchedulerHandle, Session,
    StationError, REFERENCE_FRAME,
};

/// Builds a (closed) frame source for the configured camera backend.
pub type SourceFactory = Arc<dyn Fn(&CameraConfig) -> anyhow::Result<Box<dyn FrameSource>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub mode: ModeState,
    pub region_count: usize,
    pub frame_size: Option<(u32, u32)>,
    pub last_tick: u64,
    pub detector: &'static str,
    pub actuator: String,
    pub sprays: u64,
    pub alerts: u64,
    pub suppressed_sprays: u64,
    pub last_action: Option<Action>,
    pub last_action_age_ms: Option<u64>,
    pub last_actuator_error: Option<String>,
}

/// Outcome of classifying an uploaded picture.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub result: DetectionResult,
    /// File name under the image directory, when pictures are kept.
    pub image_name: Option<String>,
}

struct Running {
    session: Arc<Session>,
    scheduler: Option<SchedulerHandle>,
}

/// Orchestrates camera, regions, mode and the scheduler for the API layer.
///
/// Start, stop, toggle and the one-shot capture are serialized by the
/// lifecycle lock, which may be held across a whole scheduler tick. Every
/// other operation reads the current session from `current`, a lock that is
/// only ever held to clone or swap an `Arc`.
pub struct VideoService {
    camera_cfg: CameraConfig,
    scheduler_cfg: SchedulerConfig,
    manual_cfg: ManualConfig,
    sources: SourceFactory,
    analyzer: Arc<Analyzer>,
    lifecycle: Mutex<Option<Running>>,
    current: RwLock<Option<Arc<Session>>>,
    // mode reported while no session exists
    idle_mode: StdMutex<ModeController>,
}

impl VideoService {
    pub fn new(
        camera_cfg: CameraConfig,
        scheduler_cfg: SchedulerConfig,
        manual_cfg: ManualConfig,
        sources: SourceFactory,
        analyzer: Arc<Analyzer>,
    ) -> Self {
        Self {
            camera_cfg,
            scheduler_cfg,
            manual_cfg,
            sources,
            analyzer,
            lifecycle: Mutex::new(None),
            current: RwLock::new(None),
            idle_mode: StdMutex::new(ModeController::default()),
        }
    }

    pub fn camera_fps(&self) -> u32 {
        self.camera_cfg.fps
    }

    /// The running session. Never waits on start, stop or toggle.
    pub fn session(&self) -> Result<Arc<Session>, StationError> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone().ok_or(StationError::NotRunning)
    }

    fn set_current(&self, session: Option<Arc<Session>>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = session;
    }

    fn idle_mode(&self) -> MutexGuard<'_, ModeController> {
        self.idle_mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn open_camera(&self, index: u32) -> Result<(Box<dyn FrameSource>, Frame), StationError> {
        let mut cam = (self.sources)(&self.camera_cfg).map_err(|e| StationError::Device(format!("{:#}", e)))?;
        if let Err(e) = cam.open(index).await {
            cam.close().await;
            return Err(e.into());
        }
        match cam.read().await {
            Ok(frame) => Ok((cam, frame)),
            Err(e) => {
                cam.close().await;
                Err(StationError::Device(e.to_string()))
            }
        }
    }

    /// Opens the camera and creates a fresh session in Manual mode.
    /// On failure no session exists afterwards.
    pub async fn start_video(&self, camera_index: Option<u32>) -> Result<StartOutcome, StationError> {
        let mut lc = self.lifecycle.lock().await;
        if lc.is_some() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        let index = camera_index.unwrap_or(self.camera_cfg.default_index);
        let (cam, first) = match self.open_camera(index).await {
            Ok(v) => v,
            Err(e) => {
                warn!("start_video: camera {} failed: {}", index, e);
                return Err(e);
            }
        };
        info!("start_video: camera {} ({}) {}x{}", index, cam.name(), first.width(), first.height());
        let session = Arc::new(Session::new(cam, first));
        self.idle_mode().reset();
        self.set_current(Some(session.clone()));
        *lc = Some(Running { session, scheduler: None });
        Ok(StartOutcome::Started)
    }

    /// Tears the session down. Returns false when there was nothing to stop.
    ///
    /// Readers see `NotRunning` as soon as this begins; the camera is released
    /// only after the tick in flight, if any, has finished.
    pub async fn stop_video(&self) -> bool {
        let mut lc = self.lifecycle.lock().await;
        self.idle_mode().reset();
        let Some(running) = lc.take() else {
            return false;
        };
        self.set_current(None);
        if let Some(s) = running.scheduler {
            s.stop().await;
        }
        running.session.close().await;
        info!("stop_video: session ended");
        true
    }

    pub async fn toggle_automatic_mode(&self) -> ModeState {
        let mut lc = self.lifecycle.lock().await;
        let Some(running) = lc.as_mut() else {
            let mode = self.idle_mode().toggle();
            info!("mode: {:?} (no session)", mode);
            return mode;
        };

        let mode = running.session.toggle_mode();
        info!("mode: {:?}", mode);
        if let Some(old) = running.scheduler.take() {
            old.stop().await;
        }
        if mode.is_automatic() {
            running.scheduler =
                Some(SchedulerHandle::spawn(running.session.clone(), self.analyzer.clone(), &self.scheduler_cfg));
        }
        mode
    }

    /// Adds a manual region around a click given in the 640x480 reference frame.
    pub fn video_click(&self, x: f64, y: f64) -> Result<(Region, usize), StationError> {
        let session = self.session()?;
        let bbox = click_region(x, y, session.frame_size(), &self.manual_cfg)?;
        let (region, count) = session.add_click_region(bbox, self.manual_cfg.click_cooldown_ms)?;
        info!("click ({:.0},{:.0}) -> region {} {:?}", x, y, region.id, region.bbox);
        Ok((region, count))
    }

    /// Classifies a stored manual region against a fresh frame.
    pub async fn detect_leaf(&self, region_index: u64) -> Result<DetectionResult, StationError> {
        let session = self.session()?;
        if session.mode().is_automatic() {
            return Err(StationError::WrongMode("manual analysis is disabled in automatic mode"));
        }
        let region = session.region(region_index)?;
        let frame = session.read_frame().await?;
        let crop = frame
            .crop_resized(&region.bbox, self.analyzer.input_size())
            .ok_or_else(|| StationError::InvalidRegion("region outside frame".into()))?;
        Ok(self
            .analyzer
            .analyze(EntrySource::Manual, region.id, region.confidence.unwrap_or(1.0), &crop, Some(region.bbox))
            .await)
    }

    pub fn get_automatic_detections(&self) -> Result<Arc<AutoBatch>, StationError> {
        let session = self.session()?;
        if !session.mode().is_automatic() {
            return Err(StationError::WrongMode("automatic mode is not enabled"));
        }
        Ok(session.batch())
    }

    /// Classifies one whole frame. Without a session the default camera is
    /// opened for a single read.
    pub async fn capture_detect(&self) -> Result<DetectionResult, StationError> {
        let frame = match self.session() {
            Ok(session) => session.read_frame().await?,
            Err(_) => self.one_shot_frame().await?,
        };
        let res = self.analyzer.analyze(EntrySource::Capture, 0, 1.0, &frame.image, None).await;
        match res.error {
            Some(e) => Err(StationError::Classification(e)),
            None => Ok(res),
        }
    }

    // The lifecycle lock is held until the one-shot handle is closed, so a
    // concurrent start_video cannot open the same device.
    async fn one_shot_frame(&self) -> Result<Arc<Frame>, StationError> {
        let lc = self.lifecycle.lock().await;
        if let Some(running) = lc.as_ref() {
            let session = running.session.clone();
            drop(lc);
            return session.read_frame().await;
        }
        let (mut cam, frame) = self.open_camera(self.camera_cfg.default_index).await?;
        cam.close().await;
        Ok(Arc::new(frame))
    }

    /// Classifies an uploaded picture without actuating.
    pub async fn upload_detect(&self, data: &[u8]) -> Result<UploadResult, StationError> {
        let image = image::load_from_memory(data)
            .map_err(|e| StationError::InvalidImage(e.to_string()))?
            .to_rgb8();
        let (result, kept) = self.analyzer.analyze_upload(&image).await;
        if let Some(e) = &result.error {
            return Err(StationError::Classification(e.clone()));
        }
        let image_name = kept
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned());
        Ok(UploadResult { result, image_name })
    }

    /// Bytes of a kept picture, by name relative to the image directory.
    pub async fn image(&self, name: &str) -> Result<Vec<u8>, StationError> {
        let path = self
            .analyzer
            .journal()
            .resolve_image(name)
            .ok_or_else(|| StationError::MissingImage(name.to_string()))?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StationError::MissingImage(name.to_string()),
            _ => StationError::Internal(format!("read {}: {}", path.display(), e)),
        })
    }

    pub fn snapshot_jpeg(&self, quality: u8) -> Result<Vec<u8>, StationError> {
        let session = self.session()?;
        let frame = session.last_frame().ok_or(StationError::NotRunning)?;
        frame.to_jpeg(quality).map_err(|e| StationError::Internal(format!("{:#}", e)))
    }

    pub fn regions(&self) -> Result<Vec<Region>, StationError> {
        Ok(self.session()?.regions())
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>, StationError> {
        self.analyzer.journal().recent(limit).await.map_err(|e| StationError::Internal(format!("{:#}", e)))
    }

    pub fn status(&self) -> ServiceStatus {
        let session = self.session().ok();
        let idle_mode = self.idle_mode().state();
        let act = self.analyzer.actuator_status();
        let detector = if self.analyzer.detector().has_model() { "primary" } else { "fallback" };
        ServiceStatus {
            running: session.is_some(),
            mode: session.as_ref().map(|s| s.mode()).unwrap_or(idle_mode),
            region_count: session.as_ref().map(|s| s.region_count()).unwrap_or(0),
            frame_size: session.as_ref().map(|s| s.frame_size()),
            last_tick: session.as_ref().map(|s| s.batch().tick).unwrap_or(0),
            detector,
            last_action_age_ms: act.last_action_age().map(|d| d.as_millis() as u64),
            last_action: act.last_action,
            last_actuator_error: act.last_error,
            actuator: act.backend,
            sprays: act.sprays,
            alerts: act.alerts,
            suppressed_sprays: act.suppressed,
        }
    }
}

/// Square of `region_size` centred on the click, clipped to the frame.
pub fn click_region(x: f64, y: f64, frame: (u32, u32), cfg: &ManualConfig) -> Result<BBox, StationError> {
    let (ref_w, ref_h) = REFERENCE_FRAME;
    if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 || x >= ref_w as f64 || y >= ref_h as f64 {
        return Err(StationError::InvalidRegion(format!("click ({}, {}) outside {}x{}", x, y, ref_w, ref_h)));
    }
    let (fw, fh) = frame;
    let cx = (x * fw as f64 / ref_w as f64) as i64;
    let cy = (y * fh as f64 / ref_h as f64) as i64;
    let half = (cfg.region_size / 2) as i64;

    let x1 = (cx - half).max(0) as u32;
    let y1 = (cy - half).max(0) as u32;
    let x2 = (cx + half).min(fw as i64) as u32;
    let y2 = (cy + half).min(fh as i64) as u32;
    let bbox = BBox::from_corners(x1, y1, x2, y2)
        .ok_or_else(|| StationError::InvalidRegion("empty click region".into()))?;
    if bbox.w < cfg.min_region_side || bbox.h < cfg.min_region_side {
        return Err(StationError::InvalidRegion(format!(
            "click region {}x{} smaller than {}px",
            bbox.w, bbox.h, cfg.min_region_side
        )));
    }
    Ok(bbox)
}
